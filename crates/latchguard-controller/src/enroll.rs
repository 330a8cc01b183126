//! Fingerprint enrollment and deletion
//!
//! Enrollment needs two captures of the same finger with a lift in between.
//! The session advances one step per loop iteration so the keypad stays
//! live and `*` can abort it.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use latchguard_core::{BiometricId, BiometricSensor, CaptureOutcome, CaptureSlot, StatusMessage};

/// Enrollment timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollTimings {
    /// Time allowed for each capture
    pub capture_timeout: Duration,
    /// Time allowed for lifting the finger; enrollment proceeds when it runs out
    pub removal_timeout: Duration,
    /// Pause after lifting before asking for the second capture
    pub removal_settle: Duration,
}

impl Default for EnrollTimings {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(10),
            removal_timeout: Duration::from_secs(5),
            removal_settle: Duration::from_secs(1),
        }
    }
}

/// Where an enrollment session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollStage {
    AwaitFirst { since: Instant },
    AwaitRemoval { since: Instant },
    Settle { since: Instant },
    AwaitSecond { since: Instant },
}

/// Why an enrollment attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollError {
    /// No finger within the capture timeout
    Timeout,
    /// The sensor could not process the image
    ImageError,
    /// The two captures did not combine into a model
    ModelFailed(String),
    /// The sensor refused to store the model
    StorageFailed(String),
}

impl EnrollError {
    pub fn message(&self) -> StatusMessage {
        match self {
            EnrollError::Timeout => StatusMessage::new("Timeout!", "Try Again"),
            EnrollError::ImageError => StatusMessage::new("Image Error", "Try Again"),
            EnrollError::ModelFailed(_) => StatusMessage::new("Prints Differ", "Try Again"),
            EnrollError::StorageFailed(_) => StatusMessage::new("Store Failed", "Try Again"),
        }
    }
}

/// Outcome of one enrollment step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollStep {
    /// Still running; show the message if there is one
    Pending(Option<StatusMessage>),
    /// Template stored
    Enrolled(BiometricId),
    /// Attempt failed; the session has been rewound to the first capture
    Failed(EnrollError),
}

/// Non-blocking enrollment of one template slot
#[derive(Debug, Clone)]
pub struct EnrollmentSession {
    id: BiometricId,
    stage: EnrollStage,
    timings: EnrollTimings,
}

impl EnrollmentSession {
    /// Begin enrolling into `id`; the caller has already rejected slot 0
    pub fn new(id: BiometricId, timings: EnrollTimings, now: Instant) -> Self {
        info!("Enrollment started for ID #{}", id);
        Self {
            id,
            stage: EnrollStage::AwaitFirst { since: now },
            timings,
        }
    }

    pub fn id(&self) -> BiometricId {
        self.id
    }

    pub fn stage(&self) -> EnrollStage {
        self.stage
    }

    /// Screen for the current stage
    pub fn prompt(&self) -> StatusMessage {
        match self.stage {
            EnrollStage::AwaitFirst { .. } => {
                StatusMessage::new(format!("Enrolling ID:{}", self.id), "Place Finger")
            }
            EnrollStage::AwaitRemoval { .. } | EnrollStage::Settle { .. } => {
                StatusMessage::new("Got Image!", "Remove Finger")
            }
            EnrollStage::AwaitSecond { .. } => StatusMessage::new("Place Same", "Finger Again"),
        }
    }

    /// Go back to the first capture after a failure
    pub fn restart(&mut self, now: Instant) {
        self.stage = EnrollStage::AwaitFirst { since: now };
    }

    /// Advance by at most one sensor interaction
    pub fn step(&mut self, sensor: &mut dyn BiometricSensor, now: Instant) -> EnrollStep {
        match self.stage {
            EnrollStage::AwaitFirst { since } => match sensor.capture(CaptureSlot::First) {
                CaptureOutcome::Captured => {
                    debug!("First capture for ID #{}", self.id);
                    self.advance(EnrollStage::AwaitRemoval { since: now })
                }
                outcome => self.capture_failed(outcome, since, now),
            },
            EnrollStage::AwaitRemoval { since } => {
                let lifted = !sensor.is_finger_present();
                if lifted || now.duration_since(since) >= self.timings.removal_timeout {
                    self.stage = EnrollStage::Settle { since: now };
                }
                EnrollStep::Pending(None)
            }
            EnrollStage::Settle { since } => {
                if now.duration_since(since) >= self.timings.removal_settle {
                    self.advance(EnrollStage::AwaitSecond { since: now })
                } else {
                    EnrollStep::Pending(None)
                }
            }
            EnrollStage::AwaitSecond { since } => match sensor.capture(CaptureSlot::Second) {
                CaptureOutcome::Captured => self.finish(sensor, now),
                outcome => self.capture_failed(outcome, since, now),
            },
        }
    }

    fn advance(&mut self, stage: EnrollStage) -> EnrollStep {
        self.stage = stage;
        EnrollStep::Pending(Some(self.prompt()))
    }

    fn capture_failed(&mut self, outcome: CaptureOutcome, since: Instant, now: Instant) -> EnrollStep {
        let error = match outcome {
            CaptureOutcome::ImageError => EnrollError::ImageError,
            _ if now.duration_since(since) >= self.timings.capture_timeout => EnrollError::Timeout,
            _ => return EnrollStep::Pending(None),
        };
        self.fail(error, now)
    }

    fn finish(&mut self, sensor: &mut dyn BiometricSensor, now: Instant) -> EnrollStep {
        if let Err(e) = sensor.create_model() {
            return self.fail(EnrollError::ModelFailed(e.to_string()), now);
        }
        if let Err(e) = sensor.store_model(self.id) {
            return self.fail(EnrollError::StorageFailed(e.to_string()), now);
        }
        info!("Enrolled fingerprint ID #{}", self.id);
        EnrollStep::Enrolled(self.id)
    }

    fn fail(&mut self, error: EnrollError, now: Instant) -> EnrollStep {
        warn!("Enrollment of ID #{} failed: {:?}", self.id, error);
        self.restart(now);
        EnrollStep::Failed(error)
    }
}

/// Remove a stored template, returning the screen to show
pub fn delete_template(sensor: &mut dyn BiometricSensor, id: BiometricId) -> (bool, StatusMessage) {
    match sensor.delete_model(id) {
        Ok(()) => {
            info!("Deleted fingerprint ID #{}", id);
            (true, StatusMessage::new("Deleted ID:", id.to_string()))
        }
        Err(e) => {
            warn!("Failed to delete ID #{}: {}", id, e);
            (false, StatusMessage::new("Failed to Delete", "Try Again"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedSensor;

    fn session(now: Instant) -> EnrollmentSession {
        EnrollmentSession::new(BiometricId::new(4), EnrollTimings::default(), now)
    }

    #[test]
    fn test_full_enrollment() {
        let start = Instant::now();
        let mut sensor = SimulatedSensor::new();
        let mut enroll = session(start);

        assert_eq!(enroll.step(&mut sensor, start), EnrollStep::Pending(None));

        sensor.place_finger(7);
        assert_eq!(
            enroll.step(&mut sensor, start),
            EnrollStep::Pending(Some(StatusMessage::new("Got Image!", "Remove Finger")))
        );

        // Finger lifted after the capture; settle runs from here
        assert_eq!(enroll.step(&mut sensor, start), EnrollStep::Pending(None));
        let settled = start + Duration::from_secs(1);
        assert_eq!(
            enroll.step(&mut sensor, settled),
            EnrollStep::Pending(Some(StatusMessage::new("Place Same", "Finger Again")))
        );

        sensor.place_finger(7);
        assert_eq!(
            enroll.step(&mut sensor, settled),
            EnrollStep::Enrolled(BiometricId::new(4))
        );
        assert_eq!(sensor.enrolled_slots(), vec![4]);
    }

    #[test]
    fn test_capture_timeout_rewinds() {
        let start = Instant::now();
        let mut sensor = SimulatedSensor::new();
        let mut enroll = session(start);

        let later = start + Duration::from_secs(10);
        assert_eq!(
            enroll.step(&mut sensor, later),
            EnrollStep::Failed(EnrollError::Timeout)
        );
        assert_eq!(enroll.stage(), EnrollStage::AwaitFirst { since: later });
    }

    #[test]
    fn test_different_fingers_fail_model() {
        let start = Instant::now();
        let mut sensor = SimulatedSensor::new();
        let mut enroll = session(start);

        sensor.place_finger(1);
        enroll.step(&mut sensor, start);
        enroll.step(&mut sensor, start);
        let settled = start + Duration::from_secs(1);
        enroll.step(&mut sensor, settled);

        sensor.place_finger(2);
        assert!(matches!(
            enroll.step(&mut sensor, settled),
            EnrollStep::Failed(EnrollError::ModelFailed(_))
        ));
        assert!(sensor.enrolled_slots().is_empty());
    }

    #[test]
    fn test_image_error_fails_immediately() {
        let start = Instant::now();
        let mut sensor = SimulatedSensor::new();
        let mut enroll = session(start);

        sensor.place_smudge();
        assert_eq!(
            enroll.step(&mut sensor, start),
            EnrollStep::Failed(EnrollError::ImageError)
        );
    }

    #[test]
    fn test_delete_reports_outcome() {
        let mut sensor = SimulatedSensor::new();
        sensor.enroll_directly(BiometricId::new(3), 9);

        let (ok, msg) = delete_template(&mut sensor, BiometricId::new(3));
        assert!(ok);
        assert_eq!(msg, StatusMessage::new("Deleted ID:", "3"));

        let (ok, msg) = delete_template(&mut sensor, BiometricId::new(3));
        assert!(!ok);
        assert_eq!(msg.line1, "Failed to Delete");
    }
}
