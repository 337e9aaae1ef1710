// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use fontdetective_worker::job::ResultRecord;
use fontdetective_worker::queue::{upload_attributes, MemoryQueue, QueueClient};
use fontdetective_worker::{
    build_worker_with_queue, PollOutcome, ResultSink, RunOutcome, WorkerConfig, WorkingArea,
};
use fontdetective_worker::vision::encode_png;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph() -> GrayImage {
        GrayImage::from_fn(8, 8, |x, y| Luma([(30 + (y * 8 + x) * 3) as u8]))
    }

    fn save(img: GrayImage, path: &Path) {
        DynamicImage::ImageLuma8(img).save(path).unwrap();
    }

    /// Scene with the glyph at (20, 12), detectors `glyph`, `inverse` and `broken`
    fn setup(root: &Path) -> (WorkerConfig, String) {
        let detectors = root.join("detectors");
        std::fs::create_dir_all(&detectors).unwrap();
        save(glyph(), &detectors.join("glyph.png"));

        let mut inverse = glyph();
        for pixel in inverse.pixels_mut() {
            pixel.0[0] = 249 - pixel.0[0];
        }
        save(inverse, &detectors.join("inverse.png"));
        std::fs::write(detectors.join("broken.png"), b"not an image at all").unwrap();

        let mut scene = GrayImage::new(48, 40);
        for (x, y, pixel) in glyph().enumerate_pixels() {
            scene.put_pixel(20 + x, 12 + y, *pixel);
        }
        let source = root.join("upload.png");
        save(scene, &source);

        let config = WorkerConfig {
            result_store_endpoint: root.join("results").display().to_string(),
            working_root: root.join("work"),
            detector_directory: detectors,
            receive_wait_secs: 0,
            match_threshold: 0.95,
            ..Default::default()
        };
        let url = Url::from_file_path(&source).unwrap().to_string();
        (config, url)
    }

    #[tokio::test]
    async fn test_memory_queue_to_result_file() {
        let root = TempDir::new().unwrap();
        let (config, url) = setup(root.path());

        let queue = MemoryQueue::new();
        let payload = format!(
            r#"{{"uid":"e2e-1","url":"{}","image":{{"w":48,"h":40}},"selection":{{"x":0,"y":0,"w":48,"h":40}}}}"#,
            url
        );
        queue
            .send(payload.into_bytes(), upload_attributes())
            .await
            .unwrap();

        let assembled = build_worker_with_queue(&config, Arc::new(queue.clone())).unwrap();
        let outcome = assembled.worker.poll_once().await;

        match outcome {
            PollOutcome::Processed(RunOutcome::Acknowledged { job_id, found }) => {
                assert_eq!(job_id, "e2e-1");
                assert_eq!(found.get("glyph"), Some(&true));
                assert_eq!(found.get("inverse"), Some(&false));
                assert!(!found.contains_key("broken"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let record_path = root.path().join("results").join("e2e-1.json");
        let record: ResultRecord =
            serde_json::from_slice(&std::fs::read(&record_path).unwrap()).unwrap();
        let glyph_report = &record.results["glyph"];
        assert_eq!(glyph_report.found, Some(true));
        assert_eq!(glyph_report.objects.len(), 1);
        assert_eq!((glyph_report.objects[0].x, glyph_report.objects[0].y), (20, 12));
        assert_eq!(record.results["broken"].found, None);
        assert!(record.results["broken"].error.is_some());

        assert!(queue.is_empty().await);
        assert!(!WorkingArea::new(&config.working_root).exists("e2e-1").await);
        assert_eq!(
            assembled.sink.location("e2e-1"),
            record_path.display().to_string()
        );
    }

    #[tokio::test]
    async fn test_scaled_selection_crops_before_detection() {
        let root = TempDir::new().unwrap();
        let (config, url) = setup(root.path());

        // Submitter saw the image at double size and selected the left half,
        // which excludes the glyph at x = 20..28
        let queue = MemoryQueue::new();
        let payload = format!(
            r#"{{"uid":"e2e-2","url":"{}","image":{{"w":96,"h":80}},"selection":{{"x":0,"y":0,"w":36,"h":80}}}}"#,
            url
        );
        queue
            .send(payload.into_bytes(), upload_attributes())
            .await
            .unwrap();

        let assembled = build_worker_with_queue(&config, Arc::new(queue.clone())).unwrap();
        match assembled.worker.poll_once().await {
            PollOutcome::Processed(RunOutcome::Acknowledged { found, .. }) => {
                assert_eq!(found.get("glyph"), Some(&false));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_source_leaves_message_for_redelivery() {
        let root = TempDir::new().unwrap();
        let (config, _) = setup(root.path());
        let missing = Url::from_file_path(root.path().join("missing.png"))
            .unwrap()
            .to_string();

        let queue = MemoryQueue::new();
        let payload = format!(
            r#"{{"uid":"e2e-3","url":"{}","image":{{"w":10,"h":10}},"selection":{{"x":0,"y":0,"w":10,"h":10}}}}"#,
            missing
        );
        queue
            .send(payload.into_bytes(), upload_attributes())
            .await
            .unwrap();

        let assembled = build_worker_with_queue(&config, Arc::new(queue.clone())).unwrap();
        let outcome = assembled.worker.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Processed(RunOutcome::Aborted { .. })
        ));

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.in_flight().await, 1);
        assert!(!root.path().join("results").join("e2e-3.json").exists());
        assert!(!WorkingArea::new(&config.working_root).exists("e2e-3").await);
    }

    #[tokio::test]
    async fn test_crop_bigger_than_download_cap_is_classified() {
        let root = TempDir::new().unwrap();
        let (mut config, _) = setup(root.path());

        // Noise compresses badly, so the lossless crop outgrows the JPEG source
        let mut rng = StdRng::seed_from_u64(42);
        let noise = RgbImage::from_fn(300, 300, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
        let source = root.path().join("noise.jpg");
        DynamicImage::ImageRgb8(noise).save(&source).unwrap();

        let decoded = image::open(&source).unwrap();
        let patch = image::imageops::crop_imm(&decoded.to_luma8(), 100, 150, 24, 24).to_image();
        save(patch, &config.detector_directory.join("patch.png"));

        config.max_image_bytes = std::fs::metadata(&source).unwrap().len() as usize + 1024;
        config.match_threshold = 0.99;
        assert!(encode_png(&decoded).unwrap().len() > config.max_image_bytes);

        let queue = MemoryQueue::new();
        let payload = format!(
            r#"{{"uid":"e2e-4","url":"{}","image":{{"w":300,"h":300}},"selection":{{"x":0,"y":0,"w":300,"h":300}}}}"#,
            Url::from_file_path(&source).unwrap()
        );
        queue
            .send(payload.into_bytes(), upload_attributes())
            .await
            .unwrap();

        let assembled = build_worker_with_queue(&config, Arc::new(queue.clone())).unwrap();
        match assembled.worker.poll_once().await {
            PollOutcome::Processed(RunOutcome::Acknowledged { found, .. }) => {
                assert_eq!(found.get("patch"), Some(&true));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let record_path = root.path().join("results").join("e2e-4.json");
        let record: ResultRecord =
            serde_json::from_slice(&std::fs::read(&record_path).unwrap()).unwrap();
        assert!(record.results["patch"].error.is_none());
        assert_eq!(
            (record.results["patch"].objects[0].x, record.results["patch"].objects[0].y),
            (100, 150)
        );
    }
}
