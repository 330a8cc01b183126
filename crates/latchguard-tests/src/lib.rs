//! Test harness for driving a [`Controller`] with simulated peripherals
//!
//! [`Rig`] boots a controller against recording adapters and advances a
//! virtual clock in fixed steps, so scenarios read as a sequence of key
//! presses, finger touches and waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use latchguard_controller::{
    sim::{
        ChannelKeypad, KeypadHandle, RecordingActuator, RecordingDisplay, RecordingFeedback,
        RecordingPower, SimulatedSensor,
    },
    Controller, ControllerConfig, Peripherals,
};
use latchguard_core::{
    BiometricId, BiometricSensor, CaptureOutcome, CaptureSlot, CredentialStore, Result, ScanResult,
};

/// Loop period used by the rig
pub const STEP: Duration = Duration::from_millis(20);

/// Finger placed into slot 3 by [`Rig::with_enrolled_finger`]
pub const ENROLLED_FINGER: u32 = 30;

/// Finger that is never enrolled
pub const STRANGER_FINGER: u32 = 99;

/// Sensor wrapper counting every enrollment or deletion call
#[derive(Clone)]
pub struct CountingSensor {
    inner: SimulatedSensor,
    template_calls: Arc<AtomicUsize>,
}

impl CountingSensor {
    pub fn new(inner: SimulatedSensor) -> Self {
        Self {
            inner,
            template_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Calls to capture, create, store or delete so far
    pub fn template_calls(&self) -> usize {
        self.template_calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.template_calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl BiometricSensor for CountingSensor {
    fn handshake(&mut self) -> Result<()> {
        self.inner.handshake()
    }

    fn poll(&mut self) -> ScanResult {
        self.inner.poll()
    }

    fn capture(&mut self, slot: CaptureSlot) -> CaptureOutcome {
        self.count();
        self.inner.capture(slot)
    }

    fn is_finger_present(&mut self) -> bool {
        self.inner.is_finger_present()
    }

    fn create_model(&mut self) -> Result<()> {
        self.count();
        self.inner.create_model()
    }

    fn store_model(&mut self, id: BiometricId) -> Result<()> {
        self.count();
        self.inner.store_model(id)
    }

    fn delete_model(&mut self, id: BiometricId) -> Result<()> {
        self.count();
        self.inner.delete_model(id)
    }
}

/// A booted controller plus handles on every simulated peripheral
pub struct Rig {
    pub controller: Controller,
    pub keys: KeypadHandle,
    pub sensor: SimulatedSensor,
    pub counting: CountingSensor,
    pub display: RecordingDisplay,
    pub feedback: RecordingFeedback,
    pub actuator: RecordingActuator,
    pub power: RecordingPower,
    pub now: Instant,
}

impl Rig {
    /// Boot against `store` and `sensor` with default timings
    pub fn boot(store: Box<dyn CredentialStore>, sensor: SimulatedSensor) -> Self {
        Self::boot_with(store, sensor, ControllerConfig::default())
    }

    pub fn boot_with(
        store: Box<dyn CredentialStore>,
        sensor: SimulatedSensor,
        config: ControllerConfig,
    ) -> Self {
        let (keypad, keys) = ChannelKeypad::new();
        let counting = CountingSensor::new(sensor.clone());
        let display = RecordingDisplay::new();
        let feedback = RecordingFeedback::new();
        let actuator = RecordingActuator::new();
        let power = RecordingPower::new();
        let now = Instant::now();

        let controller = Controller::boot(
            Peripherals {
                keypad: Box::new(keypad),
                sensor: Box::new(counting.clone()),
                store,
                display: Box::new(display.clone()),
                feedback: Box::new(feedback.clone()),
                actuator: Box::new(actuator.clone()),
                power: Box::new(power.clone()),
            },
            config,
            now,
        )
        .unwrap_or_else(|e| panic!("controller failed to boot: {}", e));

        Self {
            controller,
            keys,
            sensor,
            counting,
            display,
            feedback,
            actuator,
            power,
            now,
        }
    }

    /// Fresh in-memory lock with finger [`ENROLLED_FINGER`] in slot 3
    pub fn with_enrolled_finger(store: Box<dyn CredentialStore>) -> Self {
        let sensor = SimulatedSensor::new();
        sensor.enroll_directly(BiometricId::new(3), ENROLLED_FINGER);
        Self::boot(store, sensor)
    }

    /// Advance the clock by one loop period and tick
    pub fn step(&mut self) {
        self.now += STEP;
        self.controller.tick(self.now);
    }

    /// Keep ticking for `total`
    pub fn wait(&mut self, total: Duration) {
        let end = self.now + total;
        while self.now < end {
            self.step();
        }
    }

    /// Press each key in turn, one per keypad scan
    pub fn press(&mut self, keys: &str) {
        self.keys.type_keys(keys);
        for _ in keys.chars() {
            self.step();
        }
    }

    /// Place a finger and tick until the sensor has been polled
    pub fn touch(&mut self, finger: u32) {
        self.sensor.place_finger(finger);
        self.wait(Duration::from_millis(120));
    }

    /// Let a held result message time out
    pub fn dismiss(&mut self) {
        self.wait(Duration::from_millis(2_020));
    }

    /// Open the admin menu with the given PIN
    pub fn open_menu(&mut self, pin: &str) {
        self.press(&"#".repeat(12));
        self.press(pin);
        self.press("#");
    }
}
