//! Simulated peripherals
//!
//! Adapters for running the controller without hardware. Each one is a cheap
//! handle around shared state: hand one clone to the controller and keep
//! another to drive or inspect it from the terminal loop or a test.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use latchguard_core::{
    Actuator, BiometricId, BiometricSensor, CaptureOutcome, CaptureSlot, Display, Error, Feedback,
    FeedbackPattern, Key, Keypad, Power, Result, ScanResult, StatusMessage,
};

/// File holding the simulated sensor's template slots
pub const TEMPLATES_FILE: &str = "templates.json";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================
// Keypad
// ============================================

/// Keypad fed from a channel
pub struct ChannelKeypad {
    rx: mpsc::UnboundedReceiver<Key>,
}

/// Sending side of a [`ChannelKeypad`]
#[derive(Clone)]
pub struct KeypadHandle {
    tx: mpsc::UnboundedSender<Key>,
}

impl ChannelKeypad {
    pub fn new() -> (Self, KeypadHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, KeypadHandle { tx })
    }
}

impl Keypad for ChannelKeypad {
    fn poll(&mut self) -> Option<Key> {
        self.rx.try_recv().ok()
    }
}

impl KeypadHandle {
    /// Queue one key press
    pub fn press(&self, key: Key) {
        if self.tx.send(key).is_err() {
            warn!("Keypad closed, dropping {}", key);
        }
    }

    /// Queue every keypad legend in `keys`, skipping anything else
    pub fn type_keys(&self, keys: &str) {
        for key in keys.chars().filter_map(Key::from_char) {
            self.press(key);
        }
    }
}

// ============================================
// Fingerprint sensor
// ============================================

/// What is currently on the sensor glass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contact {
    Finger(u32),
    Smudge,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TemplateFile {
    /// Slot number to the finger stored there
    slots: BTreeMap<u16, u32>,
}

#[derive(Debug)]
struct SensorState {
    available: bool,
    contact: Option<Contact>,
    buffers: [Option<u32>; 2],
    model: Option<u32>,
    templates: TemplateFile,
    path: Option<PathBuf>,
}

impl SensorState {
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&self.templates)
            .map_err(|e| Error::Sensor(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Fingerprint sensor simulation
///
/// Fingers are identified by a number. A placed finger is read by the next
/// poll or capture and is then considered lifted.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    state: Arc<Mutex<SensorState>>,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSensor {
    /// Sensor with an empty, in-memory template database
    pub fn new() -> Self {
        Self::with_state(TemplateFile::default(), None, true)
    }

    /// Sensor that fails its handshake
    pub fn unavailable() -> Self {
        Self::with_state(TemplateFile::default(), None, false)
    }

    /// Sensor whose templates persist to `<data_dir>/templates.json`
    pub fn load(data_dir: &Path) -> crate::Result<Self> {
        let path = data_dir.join(TEMPLATES_FILE);
        let templates = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            TemplateFile::default()
        };
        debug!("Loaded {} templates from {:?}", templates.slots.len(), path);
        Ok(Self::with_state(templates, Some(path), true))
    }

    fn with_state(templates: TemplateFile, path: Option<PathBuf>, available: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState {
                available,
                contact: None,
                buffers: [None, None],
                model: None,
                templates,
                path,
            })),
        }
    }

    /// Put finger `finger` on the glass
    pub fn place_finger(&self, finger: u32) {
        lock(&self.state).contact = Some(Contact::Finger(finger));
    }

    /// Put something unreadable on the glass
    pub fn place_smudge(&self) {
        lock(&self.state).contact = Some(Contact::Smudge);
    }

    /// Store `finger` in slot `id` without going through enrollment
    pub fn enroll_directly(&self, id: BiometricId, finger: u32) {
        let mut state = lock(&self.state);
        state.templates.slots.insert(id.get(), finger);
        if let Err(e) = state.persist() {
            warn!("Failed to persist templates: {}", e);
        }
    }

    /// Occupied template slots in ascending order
    pub fn enrolled_slots(&self) -> Vec<u16> {
        lock(&self.state).templates.slots.keys().copied().collect()
    }

    fn take_contact(&self) -> Option<Contact> {
        lock(&self.state).contact.take()
    }
}

impl BiometricSensor for SimulatedSensor {
    fn handshake(&mut self) -> Result<()> {
        if lock(&self.state).available {
            Ok(())
        } else {
            Err(Error::SensorUnavailable("no response from sensor".into()))
        }
    }

    fn poll(&mut self) -> ScanResult {
        let mut state = lock(&self.state);
        if !state.available {
            return ScanResult::NoFinger;
        }
        match state.contact.take() {
            None => ScanResult::NoFinger,
            Some(Contact::Smudge) => ScanResult::ImageError,
            Some(Contact::Finger(finger)) => state
                .templates
                .slots
                .iter()
                .find(|(_, stored)| **stored == finger)
                .map(|(slot, _)| ScanResult::Matched(BiometricId::new(*slot)))
                .unwrap_or(ScanResult::NoMatch),
        }
    }

    fn capture(&mut self, slot: CaptureSlot) -> CaptureOutcome {
        match self.take_contact() {
            None => CaptureOutcome::NoFinger,
            Some(Contact::Smudge) => CaptureOutcome::ImageError,
            Some(Contact::Finger(finger)) => {
                let index = match slot {
                    CaptureSlot::First => 0,
                    CaptureSlot::Second => 1,
                };
                lock(&self.state).buffers[index] = Some(finger);
                CaptureOutcome::Captured
            }
        }
    }

    fn is_finger_present(&mut self) -> bool {
        lock(&self.state).contact.is_some()
    }

    fn create_model(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        let buffers = std::mem::take(&mut state.buffers);
        match buffers {
            [Some(a), Some(b)] if a == b => {
                state.model = Some(a);
                Ok(())
            }
            _ => Err(Error::Sensor("fingerprints did not match".into())),
        }
    }

    fn store_model(&mut self, id: BiometricId) -> Result<()> {
        let mut state = lock(&self.state);
        let finger = state
            .model
            .take()
            .ok_or_else(|| Error::Sensor("no model to store".into()))?;
        state.templates.slots.insert(id.get(), finger);
        state.persist()
    }

    fn delete_model(&mut self, id: BiometricId) -> Result<()> {
        let mut state = lock(&self.state);
        if state.templates.slots.remove(&id.get()).is_none() {
            return Err(Error::Sensor(format!("no template in slot {}", id)));
        }
        state.persist()
    }
}

// ============================================
// Output devices
// ============================================

#[derive(Debug)]
struct DisplayState {
    history: Vec<StatusMessage>,
    backlight: bool,
    powered: bool,
}

/// Display that logs and remembers every screen
#[derive(Debug, Clone)]
pub struct RecordingDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl Default for RecordingDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DisplayState {
                history: Vec::new(),
                backlight: true,
                powered: true,
            })),
        }
    }

    /// Last screen shown
    pub fn current(&self) -> Option<StatusMessage> {
        lock(&self.state).history.last().cloned()
    }

    /// Every screen shown, oldest first
    pub fn history(&self) -> Vec<StatusMessage> {
        lock(&self.state).history.clone()
    }

    /// Whether any screen so far had `line` as its first line
    pub fn showed(&self, line: &str) -> bool {
        lock(&self.state).history.iter().any(|m| m.line1 == line)
    }

    pub fn backlight(&self) -> bool {
        lock(&self.state).backlight
    }

    pub fn is_powered(&self) -> bool {
        lock(&self.state).powered
    }
}

impl Display for RecordingDisplay {
    fn show(&mut self, message: &StatusMessage) {
        info!("display {}", message);
        let mut state = lock(&self.state);
        state.powered = true;
        state.history.push(message.clone());
    }

    fn set_backlight(&mut self, on: bool) {
        debug!("backlight {}", if on { "on" } else { "off" });
        lock(&self.state).backlight = on;
    }

    fn power_off(&mut self) {
        info!("display off");
        let mut state = lock(&self.state);
        state.backlight = false;
        state.powered = false;
    }
}

/// Buzzer that logs and remembers every pattern
#[derive(Debug, Clone, Default)]
pub struct RecordingFeedback {
    played: Arc<Mutex<Vec<FeedbackPattern>>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<FeedbackPattern> {
        lock(&self.played).clone()
    }
}

impl Feedback for RecordingFeedback {
    fn play(&mut self, pattern: FeedbackPattern) {
        debug!(
            "buzzer {:?} ({} tones, {} ms)",
            pattern,
            pattern.tones().len(),
            pattern.duration_ms()
        );
        lock(&self.played).push(pattern);
    }
}

/// Relay that logs and remembers every transition
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    transitions: Arc<Mutex<Vec<bool>>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position; locked until told otherwise
    pub fn is_locked(&self) -> bool {
        lock(&self.transitions).last().copied().unwrap_or(true)
    }

    /// Number of times the relay opened
    pub fn unlock_count(&self) -> usize {
        lock(&self.transitions).iter().filter(|locked| !**locked).count()
    }
}

impl Actuator for RecordingActuator {
    fn set_locked(&mut self, locked: bool) {
        debug!("relay {}", if locked { "locked" } else { "open" });
        lock(&self.transitions).push(locked);
    }
}

/// Power control that counts hibernations
#[derive(Debug, Clone, Default)]
pub struct RecordingPower {
    hibernations: Arc<Mutex<u32>>,
}

impl RecordingPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hibernations(&self) -> u32 {
        *lock(&self.hibernations)
    }
}

impl Power for RecordingPower {
    fn hibernate(&mut self) {
        info!("entering deep sleep");
        *lock(&self.hibernations) += 1;
    }
}
