use super::AcquisitionOrchestrator;
use crate::accumulator::FrameAdmission;
use crate::domain::{ErrorType, ExamState, SensorEvent, SensorEventKind};
use crate::error::Result;
use crate::events::{ExamEvent, Notice};
use crate::ports::ImageMetadata;
use crate::reconstruction::PanoramicImage;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

impl AcquisitionOrchestrator {
    /// Payload-less form of [`Self::process_sensor_event`]; the frame is read
    /// back from the sensor
    pub fn handle_sensor_event(&self, kind: SensorEventKind, success: bool, error_code: i32) {
        self.process_sensor_event(SensorEvent {
            kind,
            success,
            error_code,
            frame: None,
            exam_id: None,
        });
    }

    /// Single entry point for asynchronous sensor notifications.
    ///
    /// Events tagged with another exam belong to an earlier sweep and are
    /// dropped. Failures end any live run; completions only count while
    /// Acquiring, so whichever of an abort and a late event loses the race
    /// finds a terminal run and changes nothing.
    pub fn process_sensor_event(&self, event: SensorEvent) {
        let mut run = self.run.lock();
        if let Some(origin) = event.exam_id {
            if run.exam_id != Some(origin) {
                debug!(
                    "Dropping {:?} sensor event from earlier exam {}",
                    event.kind,
                    origin.short()
                );
                return;
            }
        }

        if event.is_failure() {
            if run.state.is_terminal() {
                debug!("Ignoring sensor error {} in state {}", event.error_code, run.state);
                return;
            }
            run.last_event_at = Some(Utc::now());
            let (kind, message) = if event.error_code == 0 {
                (
                    ErrorType::AcquisitionTimeout,
                    "Sensor reported an unconfirmed acquisition".to_string(),
                )
            } else {
                (
                    ErrorType::SensorFault,
                    format!("Sensor reported error code {}", event.error_code),
                )
            };
            run.last_error_code = Some(event.error_code);
            run.last_error = Some(message.clone());
            self.fail_locked(&mut run, kind, &message, event.error_code);
            self.finish(run);
            return;
        }

        if run.state != ExamState::Acquiring {
            debug!("Ignoring {:?} sensor event in state {}", event.kind, run.state);
            return;
        }
        run.last_event_at = Some(Utc::now());

        let exam_id = run.exam_id;
        let index = event
            .frame
            .as_ref()
            .map(|f| f.sequence_index)
            .unwrap_or_else(|| run.accumulator.next_index());
        let frame = event.frame.or_else(|| self.sensor.read_frame(index));

        match frame {
            Some(frame) => match run.accumulator.add_frame(frame) {
                FrameAdmission::Accepted => {
                    trace!("Frame {} accepted", index);
                    run.event(ExamEvent::FrameAccepted { exam_id, index });
                    let fraction = run.accumulator.progress();
                    run.progress(fraction);
                }
                rejected => run.event(ExamEvent::FrameRejected {
                    exam_id,
                    index,
                    reason: rejected.reason().to_string(),
                }),
            },
            None => {
                run.accumulator.record_missing(index);
                run.event(ExamEvent::FrameRejected {
                    exam_id,
                    index,
                    reason: "readout unavailable".to_string(),
                });
            }
        }

        if run.accumulator.is_complete() {
            run.accumulator.finalize();
            if let Err(e) = self.sensor.stop_acquisition() {
                debug!("Sensor stop after full sweep did not succeed: {}", e);
            }
            run.transition(ExamState::Reconstructing);
            self.finish(run);
            self.reconstruct_image();
        } else if run.accumulator.sweep_ended() {
            let stats = run.accumulator.stats();
            let message = format!(
                "Sweep ended with {} of {} frames usable",
                stats.frames_acquired, stats.frames_expected
            );
            self.fail_locked(&mut run, ErrorType::FrameLossExceeded, &message, 0);
            self.finish(run);
        } else {
            self.finish(run);
        }
    }

    /// Stitch the accumulated frames; on success continues with
    /// post-processing on the same thread
    pub fn reconstruct_image(&self) -> bool {
        let frames = {
            let run = self.run.lock();
            if run.state != ExamState::Reconstructing {
                debug!("reconstruct_image ignored in state {}", run.state);
                return false;
            }
            run.accumulator.ordered_frames()
        };

        let result = self.pipeline.reconstruct(&frames);

        let mut run = self.run.lock();
        if run.state != ExamState::Reconstructing {
            debug!("Run left Reconstructing while stitching; result discarded");
            return false;
        }

        match result {
            Ok(image) => {
                run.progress(self.stage_fraction(1));
                run.transition(ExamState::PostProcessing);
                self.finish(run);
                self.apply_image_post_processing(image).is_some()
            }
            Err(e) => {
                error!("Reconstruction failed: {}", e);
                let message = e.to_string();
                self.fail_locked(&mut run, ErrorType::ReconstructionFailure, &message, 0);
                self.finish(run);
                false
            }
        }
    }

    /// Filter and persist the stitched image; returns the stored path
    pub fn apply_image_post_processing(&self, image: PanoramicImage) -> Option<PathBuf> {
        let metadata = {
            let run = self.run.lock();
            if run.state != ExamState::PostProcessing {
                debug!("apply_image_post_processing ignored in state {}", run.state);
                return None;
            }
            let (Some(exam_id), Some(specification)) = (run.exam_id, run.specification.as_ref())
            else {
                return None;
            };
            ImageMetadata {
                exam_id,
                exam_type: specification.exam_type,
                patient_size: specification.patient_size,
                factors: run.factors.unwrap_or(specification.factors),
                frame_count: run.accumulator.frames_acquired(),
                width: image.width(),
                height: image.height(),
                filters: Vec::new(),
                created_at: Utc::now(),
            }
        };

        let path = self.output_path(&metadata);
        let outcome = self.filter_and_store(image, &path, metadata);

        let mut run = self.run.lock();
        if run.state != ExamState::PostProcessing {
            debug!("Run left PostProcessing while filtering; image discarded");
            return None;
        }

        match outcome {
            Ok(filtered) => {
                run.image_path = Some(path.clone());
                run.image = Some(Arc::new(filtered));
                run.progress(1.0);
                run.transition(ExamState::Completed);
                let exam_id = run.exam_id;
                run.event(ExamEvent::ExamCompleted {
                    exam_id,
                    image_path: path.clone(),
                });
                info!("Exam {} image stored at {}", run.exam_label(), path.display());
                self.finish(run);
                Some(path)
            }
            Err(e) => {
                error!("Post-processing failed: {}", e);
                let message = e.to_string();
                self.fail_locked(&mut run, ErrorType::PostProcessingFailure, &message, 0);
                self.finish(run);
                None
            }
        }
    }

    /// Runs without the run lock; progress goes straight to observers
    fn filter_and_store(
        &self,
        image: PanoramicImage,
        path: &Path,
        mut metadata: ImageMetadata,
    ) -> Result<PanoramicImage> {
        if self.config.pipeline.keep_raw {
            let raw_path = raw_path_for(path);
            self.store.save(&image, &raw_path, &metadata)?;
            debug!("Raw reconstruction kept at {}", raw_path.display());
        }

        let exam_id = Some(metadata.exam_id);
        let filtered = self.pipeline.post_process(image, |done| {
            let fraction = self.stage_fraction(1 + done);
            self.dispatcher.deliver(vec![
                Notice::Progress(fraction),
                Notice::Event(ExamEvent::Progress { exam_id, fraction }),
            ]);
        })?;

        metadata.filters = self.pipeline.filter_names();
        metadata.width = filtered.width();
        metadata.height = filtered.height();
        self.store.save(&filtered, path, &metadata)?;
        Ok(filtered)
    }

    fn stage_fraction(&self, stages_done: usize) -> f32 {
        stages_done as f32 / self.pipeline.stage_count() as f32
    }

    /// `<output_dir>/pan_<timestamp>_<exam>.png`
    fn output_path(&self, metadata: &ImageMetadata) -> PathBuf {
        let file_name = format!(
            "pan_{}_{}.png",
            metadata.created_at.format("%Y%m%d_%H%M%S"),
            metadata.exam_id.short()
        );
        Path::new(&self.config.pipeline.output_dir).join(file_name)
    }
}

fn raw_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pan".to_string());
    path.with_file_name(format!("{}_raw.png", stem))
}
