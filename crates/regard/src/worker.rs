//! Off-thread model training.
//!
//! Training is CPU-bound and can suspend its caller for tens of milliseconds
//! on large sample sets, which is too long for a latency-sensitive frame
//! loop. [`TrainingWorker`] moves the fit onto a dedicated thread behind a
//! pair of bounded channels; only plain values cross the boundary (samples
//! in, a serialised weight bundle out), so the per-frame pipeline never
//! shares state with the trainer.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::model::{CalibrationSample, GazeModel, GazeModelConfig, TrainingReport};

/// A trained model, ready to be imported into the tracking-side [`GazeModel`].
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// JSON artefact for [`GazeModel::import_model`].
    pub model_json: String,
    pub report: TrainingReport,
}

/// Handle to the training thread.
pub struct TrainingWorker {
    jobs: Option<Sender<Vec<CalibrationSample>>>,
    results: Receiver<Result<TrainingOutcome>>,
    handle: Option<JoinHandle<()>>,
}

impl TrainingWorker {
    /// Spawns the worker thread. Each submitted sample set is trained with a
    /// fresh model built from `config`.
    pub fn spawn(config: GazeModelConfig) -> std::io::Result<Self> {
        let (job_tx, job_rx) = bounded::<Vec<CalibrationSample>>(1);
        let (result_tx, result_rx) = bounded(1);

        let handle = std::thread::Builder::new()
            .name("gaze-trainer".into())
            .spawn(move || {
                for samples in job_rx {
                    let mut model = GazeModel::new(config.clone());
                    let outcome = model.train(&samples).and_then(|report| {
                        Ok(TrainingOutcome {
                            model_json: model.export_model()?,
                            report,
                        })
                    });
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    /// Submits a training job. Returns `false` when the worker is busy or
    /// has shut down.
    pub fn submit(&self, samples: Vec<CalibrationSample>) -> bool {
        match &self.jobs {
            Some(jobs) => match jobs.try_send(samples) {
                Ok(()) => true,
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    /// Blocks until the next training result arrives.
    pub fn recv(&self) -> Option<Result<TrainingOutcome>> {
        self.results.recv().ok()
    }
}

impl Drop for TrainingWorker {
    fn drop(&mut self) {
        // closing the job channel lets the thread run off the end of its loop
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::EyeFeatures;

    fn samples() -> Vec<CalibrationSample> {
        let mut out = Vec::new();
        let mut t = 0.0;
        for row in 0..5 {
            for col in 0..5 {
                let target_x = 100.0 + col as f64 * 400.0;
                let target_y = 100.0 + row as f64 * 200.0;
                for _ in 0..10 {
                    let mut features = EyeFeatures::absent(t);
                    features.left_iris = [0.35, 0.4];
                    features.right_iris = [0.55, 0.4];
                    features.left_iris_rel = [target_x / 1920.0, target_y / 1080.0];
                    features.right_iris_rel = features.left_iris_rel;
                    features.eye_openness = 0.3;
                    features.left_ear = 0.3;
                    features.right_ear = 0.3;
                    features.face_scale = 0.15;
                    features.left_eye_width = 0.08;
                    features.right_eye_width = 0.08;
                    features.confidence = 1.0;
                    out.push(CalibrationSample {
                        features,
                        target_x,
                        target_y,
                    });
                    t += 16.0;
                }
            }
        }
        out
    }

    #[test]
    fn worker_trains_off_thread() {
        let worker = TrainingWorker::spawn(GazeModelConfig::default()).unwrap();
        assert!(worker.submit(samples()));
        let outcome = worker.recv().unwrap().unwrap();
        assert!(outcome.report.mean_error_px < 50.0);

        // the artefact trains the tracking-side model
        let mut model = GazeModel::new(GazeModelConfig::default());
        model.import_model(&outcome.model_json).unwrap();
        assert!(model.is_trained());
    }

    #[test]
    fn worker_reports_training_failures() {
        let worker = TrainingWorker::spawn(GazeModelConfig::default()).unwrap();
        assert!(worker.submit(samples().into_iter().take(10).collect()));
        let outcome = worker.recv().unwrap();
        assert!(outcome.is_err());
    }
}
