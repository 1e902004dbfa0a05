use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::TimingConfig;
use super::frame::{parse_response, Command, Response};
use super::link::{ConnectionState, MeterLink};
use super::MercuryError;

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        settle_delay_ms: 0,
        read_timeout_ms: 10,
        max_read_attempts: 3,
        sample_pause_ms: 0,
        power_sample_pause_ms: 0,
        address_attempts: 5,
        address_retry_ms: 0,
    }
}

/// Answer of an instantaneous register holding `raw`.
pub fn instant_answer(raw: u32) -> Vec<u8> {
    vec![0x2A, (raw >> 16) as u8, raw as u8, (raw >> 8) as u8, 0x00, 0x00]
}

/// Answer of an energy query with `raw` as the active energy.
pub fn energy_answer(raw: u32) -> Vec<u8> {
    let mut a = vec![0u8; 19];
    a[0] = 0x2A;
    a[1] = (raw >> 16) as u8;
    a[2] = (raw >> 24) as u8;
    a[3] = raw as u8;
    a[4] = (raw >> 8) as u8;
    a
}

/// A meter link answering from a per command script, unscripted commands get
/// the blank answer.
pub struct ScriptedLink {
    answers: Mutex<HashMap<Vec<u8>, VecDeque<Result<Vec<u8>, MercuryError>>>>,
    sent: Mutex<Vec<Command>>,
    state: Mutex<ConnectionState>,
    connect_error: Mutex<Option<MercuryError>>,
    connects: Mutex<usize>,
}

impl ScriptedLink {
    pub fn connected() -> Self {
        let l = ScriptedLink::disconnected();
        *l.state.lock().unwrap() = ConnectionState::Connected;
        l
    }

    pub fn disconnected() -> Self {
        ScriptedLink {
            answers: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            connect_error: Mutex::new(None),
            connects: Mutex::new(0),
        }
    }

    pub fn script(&self, command: Command, answers: Vec<Vec<u8>>) {
        let mut map = self.answers.lock().unwrap();
        let queue = map.entry(command.words()).or_default();
        for a in answers {
            queue.push_back(Ok(a));
        }
    }

    pub fn script_error(&self, command: Command, error: MercuryError) {
        let mut map = self.answers.lock().unwrap();
        map.entry(command.words()).or_default().push_back(Err(error));
    }

    pub fn fail_connect(&self, error: MercuryError) {
        *self.connect_error.lock().unwrap() = Some(error);
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self, command: &Command) -> usize {
        self.sent.lock().unwrap().iter().filter(|c| *c == command).count()
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

#[async_trait]
impl MeterLink for ScriptedLink {
    async fn connect(&self) -> Result<(), MercuryError> {
        *self.connects.lock().unwrap() += 1;
        if let Some(e) = self.connect_error.lock().unwrap().clone() {
            return Err(e);
        }
        *self.state.lock().unwrap() = ConnectionState::Connected;
        Ok(())
    }

    async fn authenticate_and_send(&self, command: &Command, _password: &str) -> Result<Response, MercuryError> {
        self.sent.lock().unwrap().push(command.clone());
        let next = self
            .answers
            .lock()
            .unwrap()
            .get_mut(&command.words())
            .and_then(|q| q.pop_front());
        match next {
            Some(Ok(bytes)) => Ok(parse_response(&bytes, command.expected_len())),
            Some(Err(e)) => Err(e),
            None => Ok(Response::empty(command.expected_len())),
        }
    }

    async fn disconnect(&self) {
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
