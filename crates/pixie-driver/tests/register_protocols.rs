//! CSR guards and host bus arbitration over the simulated bus

use pixie_driver::memory::IO_BUFFER_ADDR;
use pixie_driver::{
    csr, BitGuard, HostBus, HostBusRequest, Module, ModuleConfig, PixieError, Result, Revision,
    SimulatedBus, Timing,
};
use pixie_hw::regs::{self, csr as bits, hbr};
use pixie_hw::{fippi, Word};
use std::sync::Arc;

fn module() -> (Arc<SimulatedBus>, Module) {
    let bus = Arc::new(SimulatedBus::new());
    let config = ModuleConfig::mainboard(3, 1, Revision::F, 16).with_timing(Timing::IMMEDIATE);
    let module = Module::new(config, bus.clone()).expect("module");
    (bus, module)
}

// ── CSR ─────────────────────────────────────────────────────────────────────

#[test]
fn nested_guards_restore_csr() {
    let (bus, module) = module();
    let unrelated: Word = 1 << 12;
    bus.poke(regs::CSR, unrelated);
    {
        let _outer = BitGuard::new(&module, bits::PCIACTIVE).expect("outer");
        assert_eq!(bus.peek(regs::CSR), unrelated | bits::PCIACTIVE);
        {
            let _inner = BitGuard::new(&module, bits::DSPDOWNLOAD).expect("inner");
            assert_eq!(
                bus.peek(regs::CSR),
                unrelated | bits::PCIACTIVE | bits::DSPDOWNLOAD
            );
        }
        assert_eq!(bus.peek(regs::CSR), unrelated | bits::PCIACTIVE);
    }
    assert_eq!(bus.peek(regs::CSR), unrelated);
}

#[test]
fn guard_clears_on_error_path() {
    fn run(module: &Module) -> Result<()> {
        let _run = BitGuard::new(module, bits::RUNENA)?;
        Err(PixieError::invalid_value("run aborted"))
    }

    let (bus, module) = module();
    assert!(run(&module).is_err());
    assert_eq!(bus.peek(regs::CSR) & bits::RUNENA, 0);
    assert_eq!(bus.writes_to(regs::CSR), vec![bits::RUNENA, 0]);
}

#[test]
fn fifo_wait_is_bounded() {
    let (bus, module) = module();
    let err = csr::fifo_ready_wait(&module, 5).expect_err("never ready");
    assert!(matches!(err, PixieError::HardwareTimeout { polls: 5, .. }));
    assert_eq!(bus.reads_of(regs::CSR), 5);

    bus.poke(regs::CSR, bits::EXTFIFO_WML);
    csr::fifo_ready_wait(&module, 5).expect("ready");
    assert_eq!(bus.reads_of(regs::CSR), 6);
}

#[test]
fn reset_writes_default() {
    let (bus, module) = module();
    bus.poke(regs::CSR, 0xffff);
    csr::reset(&module).expect("reset");
    assert_eq!(bus.peek(regs::CSR), bits::DEFAULT);
}

// ── Host bus ────────────────────────────────────────────────────────────────

#[test]
fn dsp_block_read_holds_bus_once() {
    let (bus, module) = module();
    let mut words = [0; 16];
    HostBus::dsp(&module)
        .read_block(IO_BUFFER_ADDR, &mut words)
        .expect("read");
    assert_eq!(bus.writes_to(regs::REQUEST_HBR), vec![hbr::REQUEST]);
    assert_eq!(bus.writes_to(regs::HBR_DONE), vec![hbr::RELEASE]);
    assert_eq!(bus.writes_to(regs::EXT_MEM_TEST), vec![IO_BUFFER_ADDR]);
    assert_eq!(bus.reads_of(regs::WRT_DSP_MMA), 16);
}

#[test]
fn fippi_access_skips_arbitration() {
    let (bus, module) = module();
    HostBus::fippi(&module)
        .write(fippi::addr(1, fippi::ADCCTRL), 3)
        .expect("write");
    assert!(bus.writes_to(regs::REQUEST_HBR).is_empty());
    assert!(bus.writes_to(regs::HBR_DONE).is_empty());
}

#[test]
fn release_follows_request() {
    let (bus, module) = module();
    {
        let mut request = HostBusRequest::new(&module, true).expect("hbr");
        request.release(false).expect("release");
        request.request(false).expect("request");
    }
    let order: Vec<_> = bus
        .log()
        .into_iter()
        .map(|record| record.access.addr())
        .collect();
    assert_eq!(
        order,
        vec![
            regs::REQUEST_HBR,
            regs::HBR_DONE,
            regs::REQUEST_HBR,
            regs::HBR_DONE
        ]
    );
}
