//! Shared board drivers under concurrent use
//!
//! The simulated bus sleeps after every access outside its own lock, so
//! threads overlap unless the drivers serialise them.

use pixie_driver::backends::{Access, AccessRecord};
use pixie_driver::fixture::adc_spi::AdcSpiDriver;
use pixie_driver::fixture::fippi_reg::FippiRegister;
use pixie_driver::fixture::mb_gain::MbGainDriver;
use pixie_driver::fixture::BoardKind;
use pixie_driver::memory::IO_BUFFER_ADDR;
use pixie_driver::{HostBus, Module, ModuleConfig, SimulatedBus, SoftwareModule, Timing};
use pixie_hw::adc::{ad9434, TestMode};
use pixie_hw::{fippi, gain, regs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const LATENCY: Duration = Duration::from_micros(50);

fn rig() -> (SoftwareModule, Arc<SimulatedBus>, Module) {
    let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db10]).with_timing(Timing::IMMEDIATE);
    let model = SoftwareModule::new(&config);
    let bus = Arc::new(SimulatedBus::with_model(model.clone()).with_latency(LATENCY));
    let module = Module::new(config, bus.clone()).expect("module");
    (model, bus, module)
}

/// Every host window address latch is followed by its data access from the
/// same thread
fn assert_window_pairs_unsplit(log: &[AccessRecord]) {
    for (index, record) in log.iter().enumerate() {
        if let Access::Write {
            addr: regs::EXT_MEM_TEST,
            ..
        } = record.access
        {
            let next = log
                .iter()
                .skip(index + 1)
                .find(|r| r.access.addr() != regs::REQUEST_HBR)
                .expect("data access after latch");
            assert_eq!(next.access.addr(), regs::WRT_DSP_MMA);
            assert_eq!(next.thread, record.thread);
        }
    }
}

#[test]
fn adc_port_commands_are_not_interleaved() {
    let (model, bus, module) = rig();
    let spi = Arc::new(AdcSpiDriver::new(0, Duration::ZERO));
    thread::scope(|scope| {
        for channel in 0..4 {
            let spi = Arc::clone(&spi);
            let module = &module;
            scope.spawn(move || {
                for _ in 0..10 {
                    spi.write(module, channel, ad9434::TEST_IO, 4).expect("write");
                    assert_eq!(
                        spi.read(module, channel, ad9434::CHIP_ID).expect("read"),
                        0x6a
                    );
                }
            });
        }
    });
    let log = bus.log();
    assert_window_pairs_unsplit(&log);
    let commands = bus.writes_to(regs::EXT_MEM_TEST);
    assert_eq!(
        commands
            .iter()
            .filter(|addr| **addr == fippi::addr(0, fippi::ADCSPI))
            .count(),
        80
    );
    for channel in 0..4 {
        assert_eq!(model.test_mode(channel), Some(TestMode::Checkerboard));
    }
}

#[test]
fn gain_latch_updates_are_not_lost() {
    let (model, _bus, module) = rig();
    let latch = Arc::new(MbGainDriver::new(&module, 0, Duration::ZERO));
    thread::scope(|scope| {
        for channel in 0..4 {
            let latch = Arc::clone(&latch);
            let module = &module;
            scope.spawn(move || latch.set_gain(module, channel, 1).expect("gain"));
        }
    });
    let expected = gain::MASK[1]
        .iter()
        .fold(gain::LATCH_DEFAULT, |latch, bit| latch & !bit);
    assert_eq!(latch.latch(), expected);
    assert_eq!(model.gain_latch(0), Some(expected));
}

#[test]
fn register_fields_are_not_lost() {
    let (model, _bus, module) = rig();
    let bitslip = Arc::new(FippiRegister::new(&module, "bitslip", 0, fippi::BITSLIP));
    thread::scope(|scope| {
        for (channel, base) in [0u32, 4, 12, 8].into_iter().enumerate() {
            let bitslip = Arc::clone(&bitslip);
            let module = &module;
            scope.spawn(move || {
                let value = u32::try_from(channel + 5).expect("small");
                bitslip.write_field(module, value, base, 4).expect("field");
            });
        }
    });
    assert_eq!(bitslip.read(), 0x7865);
    for channel in 0..4 {
        assert_eq!(model.bitslip(channel), u32::try_from(channel + 5).ok());
    }
}

#[test]
fn dsp_transfers_hold_host_bus_one_at_a_time() {
    let (_model, bus, module) = rig();
    thread::scope(|scope| {
        for _ in 0..4 {
            let module = &module;
            scope.spawn(move || {
                let mut words = [0; 8];
                for _ in 0..5 {
                    HostBus::dsp(module)
                        .read_block(IO_BUFFER_ADDR, &mut words)
                        .expect("read");
                }
            });
        }
    });
    let mut holding = false;
    for record in bus.log() {
        match record.access.addr() {
            regs::REQUEST_HBR => {
                assert!(!holding, "host bus requested twice");
                holding = true;
            }
            regs::HBR_DONE => {
                assert!(holding, "host bus released while free");
                holding = false;
            }
            _ => {}
        }
    }
    assert!(!holding);
    assert_eq!(bus.writes_to(regs::REQUEST_HBR).len(), 20);
}
