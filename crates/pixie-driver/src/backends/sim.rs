//! Simulated register bus
//!
//! An in-memory register file standing in for a module's host registers.
//! Every access is appended to a log together with the calling thread, so
//! tests can assert exact write counts and the order in which concurrent
//! transactions reached the bus. A [`DeviceModel`] can be plugged in to give
//! registers behaviour (status bits that change, data ports that
//! auto-increment).
//!
//! An optional latency is slept *outside* the bus lock, so concurrent callers
//! really do overlap unless something above the bus serialises them.

use crate::bus::{BusType, RegisterBus};
use crate::error::Result;
use pixie_hw::{Address, Word};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Plain register storage
#[derive(Debug, Default, Clone)]
pub struct RegisterFile {
    words: BTreeMap<Address, Word>,
}

impl RegisterFile {
    /// Value of a register, zero if never written
    pub fn get(&self, addr: Address) -> Word {
        self.words.get(&addr).copied().unwrap_or(0)
    }

    /// Store a register value
    pub fn set(&mut self, addr: Address, value: Word) {
        self.words.insert(addr, value);
    }
}

/// Behaviour behind the register file
pub trait DeviceModel: Debug + Send {
    /// Called for every write
    fn write(&mut self, regs: &mut RegisterFile, addr: Address, value: Word) {
        regs.set(addr, value);
    }

    /// Called for every read
    fn read(&mut self, regs: &mut RegisterFile, addr: Address) -> Word {
        regs.get(addr)
    }
}

/// Registers with no behaviour
#[derive(Debug, Default)]
pub struct PlainRegisters;

impl DeviceModel for PlainRegisters {}

/// One bus access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Word read and the value returned
    Read {
        /// Register address
        addr: Address,
        /// Value returned
        value: Word,
    },
    /// Word write
    Write {
        /// Register address
        addr: Address,
        /// Value written
        value: Word,
    },
}

impl Access {
    /// Register address of the access
    pub const fn addr(&self) -> Address {
        match self {
            Self::Read { addr, .. } | Self::Write { addr, .. } => *addr,
        }
    }

    /// True for writes
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}

/// Logged access with the thread that made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    /// The access
    pub access: Access,
    /// Calling thread
    pub thread: ThreadId,
}

#[derive(Debug)]
struct SimState {
    regs: RegisterFile,
    model: Box<dyn DeviceModel>,
    log: Vec<AccessRecord>,
    logging: bool,
}

/// Simulated bus
#[derive(Debug)]
pub struct SimulatedBus {
    state: Mutex<SimState>,
    latency: Duration,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Plain registers, no latency
    pub fn new() -> Self {
        Self::with_model(PlainRegisters)
    }

    /// Registers backed by a device model
    pub fn with_model(model: impl DeviceModel + 'static) -> Self {
        Self {
            state: Mutex::new(SimState {
                regs: RegisterFile::default(),
                model: Box::new(model),
                log: Vec::new(),
                logging: true,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Sleep this long after every access, outside the bus lock
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Preset a register without logging or model involvement
    pub fn poke(&self, addr: Address, value: Word) {
        self.state().regs.set(addr, value);
    }

    /// Current register value without logging or model involvement
    pub fn peek(&self, addr: Address) -> Word {
        self.state().regs.get(addr)
    }

    /// Stop or restart recording accesses
    pub fn set_logging(&self, logging: bool) {
        self.state().logging = logging;
    }

    /// Copy of the access log
    pub fn log(&self) -> Vec<AccessRecord> {
        self.state().log.clone()
    }

    /// Empty the access log
    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Values written to a register, in order
    pub fn writes_to(&self, addr: Address) -> Vec<Word> {
        self.state()
            .log
            .iter()
            .filter_map(|r| match r.access {
                Access::Write { addr: a, value } if a == addr => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Number of reads of a register
    pub fn reads_of(&self, addr: Address) -> usize {
        self.state()
            .log
            .iter()
            .filter(|r| !r.access.is_write() && r.access.addr() == addr)
            .count()
    }

    fn pause(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

impl RegisterBus for SimulatedBus {
    fn read_word(&self, addr: Address) -> Result<Word> {
        let value = {
            let mut state = self.state();
            let SimState { regs, model, .. } = &mut *state;
            let value = model.read(regs, addr);
            if state.logging {
                state.log.push(AccessRecord {
                    access: Access::Read { addr, value },
                    thread: thread::current().id(),
                });
            }
            value
        };
        tracing::trace!("sim: read @ {addr:#x} = {value:#x}");
        self.pause();
        Ok(value)
    }

    fn write_word(&self, addr: Address, value: Word) -> Result<()> {
        {
            let mut state = self.state();
            let SimState { regs, model, .. } = &mut *state;
            model.write(regs, addr, value);
            if state.logging {
                state.log.push(AccessRecord {
                    access: Access::Write { addr, value },
                    thread: thread::current().id(),
                });
            }
        }
        tracing::trace!("sim: write @ {addr:#x} = {value:#x}");
        self.pause();
        Ok(())
    }

    fn bus_type(&self) -> BusType {
        BusType::Simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        reads: usize,
    }

    impl DeviceModel for Counter {
        fn read(&mut self, _regs: &mut RegisterFile, _addr: Address) -> Word {
            self.reads += 1;
            Word::try_from(self.reads).unwrap_or(Word::MAX)
        }
    }

    #[test]
    fn plain_registers_store_values() {
        let bus = SimulatedBus::new();
        bus.write_word(0x10, 7).expect("write");
        assert_eq!(bus.read_word(0x10).expect("read"), 7);
        assert_eq!(bus.read_word(0x14).expect("read"), 0);
        assert_eq!(bus.writes_to(0x10), vec![7]);
        assert_eq!(bus.reads_of(0x14), 1);
    }

    #[test]
    fn model_sees_reads() {
        let bus = SimulatedBus::with_model(Counter::default());
        assert_eq!(bus.read_word(0).expect("read"), 1);
        assert_eq!(bus.read_word(0).expect("read"), 2);
    }

    #[test]
    fn poke_is_not_logged() {
        let bus = SimulatedBus::new();
        bus.poke(0x48, 0xff);
        assert_eq!(bus.peek(0x48), 0xff);
        assert!(bus.log().is_empty());
    }

    #[test]
    fn logging_can_be_paused() {
        let bus = SimulatedBus::new();
        bus.set_logging(false);
        bus.write_word(0, 1).expect("write");
        bus.set_logging(true);
        bus.write_word(0, 2).expect("write");
        assert_eq!(bus.writes_to(0), vec![2]);
        bus.clear_log();
        assert!(bus.log().is_empty());
        assert_eq!(bus.peek(0), 2);
    }
}
