//! Daughterboard front end procedures against the software module
//!
//! Traces come from [`SoftwareModule`]: each channel's ADC follows its offset
//! DAC, or its partner's when a pair is crossed and not yet corrected.

use pixie_driver::fixture::{items, tests, Assembly, BoardKind};
use pixie_driver::{
    Module, ModuleConfig, PixieError, SimulatedBus, SoftwareModule, Timing, OFFSET_DAC_MID,
};
use pixie_hw::adc::TestMode;
use std::sync::Arc;
use tracing::Level;

const TRACE_LENGTH: usize = 1024;

fn rig(
    boards: &[BoardKind],
    tune: impl FnOnce(SoftwareModule) -> SoftwareModule,
) -> (SoftwareModule, Module) {
    let config = ModuleConfig::rev_h(2, 0, boards)
        .with_timing(Timing::IMMEDIATE)
        .with_trace_length(TRACE_LENGTH);
    let model = tune(SoftwareModule::new(&config));
    let bus = Arc::new(SimulatedBus::with_model(model.clone()));
    bus.set_logging(false);
    let mut module = Module::new(config, bus)
        .expect("module")
        .with_run_control(Arc::new(model.run_control()));
    module.init_fixtures().expect("fixtures");
    (model, module)
}

fn channel_bool(module: &Module, channel: usize, item: &str) -> bool {
    module.fixtures().expect("fixtures").channels()[channel]
        .get_bool(item)
        .expect("item")
}

fn channel_uint(module: &Module, channel: usize, item: &str) -> u32 {
    module.fixtures().expect("fixtures").channels()[channel]
        .get_uint(item)
        .expect("item")
}

fn run_test(module: &mut Module, test: &str) -> (bool, Vec<(String, Level)>) {
    let mut lines = Vec::new();
    let passed = module
        .run_test(test, &mut |line: &str, level| lines.push((line.to_string(), level)))
        .expect("test");
    (passed, lines)
}

// ── Layout ──────────────────────────────────────────────────────────────────

#[test]
fn rev_h_channels_follow_boards() {
    let (_model, module) = rig(&[BoardKind::Db04, BoardKind::Db10], |m| m);
    let fixtures = module.fixtures().expect("fixtures");
    assert_eq!(fixtures.label(), "afe-dbs");
    assert_eq!(fixtures.channels().len(), 8);
    assert_eq!(fixtures.channels()[2].label(), "DB04");
    assert_eq!(fixtures.channels()[5].label(), "DB10");
    assert_eq!(channel_uint(&module, 6, items::DB_NUMBER), 1);
    assert_eq!(channel_uint(&module, 6, items::DB_OFFSET), 2);
    assert_eq!(channel_uint(&module, 6, items::DB_BASE), 4);
}

#[test]
fn mainboard_label_rejected_on_rev_h() {
    let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Mainboard]).with_timing(Timing::IMMEDIATE);
    let mut module = Module::new(config, Arc::new(SimulatedBus::new())).expect("module");
    assert!(matches!(
        module.init_fixtures(),
        Err(PixieError::InvalidConfiguration { .. })
    ));
}

// ── Boot ────────────────────────────────────────────────────────────────────

#[test]
fn boot_corrects_crossed_pair() {
    let (model, mut module) = rig(&[BoardKind::Db04, BoardKind::Db04], |m| m.swap_pair(1, 0));
    module.boot_fixtures().expect("boot");

    assert_eq!(model.adcctrl(0), Some(0));
    assert_eq!(model.adcctrl(1), Some(1));
    for channel in [4, 5] {
        assert!(channel_bool(&module, channel, items::ADC_SWAP));
    }
    for channel in [0, 1, 2, 3, 6, 7] {
        assert!(!channel_bool(&module, channel, items::ADC_SWAP));
    }
    for channel in 0..8 {
        assert_eq!(
            module.channel_params(channel).expect("params").offset_dac,
            OFFSET_DAC_MID
        );
    }
}

#[test]
fn boot_without_crossing_leaves_adcctrl() {
    let (model, mut module) = rig(&[BoardKind::Db04], |m| m);
    module.boot_fixtures().expect("boot");
    assert_eq!(model.adcctrl(0), Some(0));
    assert_eq!(model.dac(0), Some(OFFSET_DAC_MID));
}

#[test]
fn reload_forgets_swap_state() {
    let (_model, mut module) = rig(&[BoardKind::Db04], |m| m.swap_pair(0, 1));
    module.boot_fixtures().expect("boot");
    assert!(channel_bool(&module, 2, items::ADC_SWAP));
    module.fpga_fippi_loaded().expect("loaded");
    assert!(!channel_bool(&module, 2, items::ADC_SWAP));
    assert!(!channel_bool(&module, 2, items::ADC_SWAP_DISABLE));
}

#[test]
fn swap_disabled_channels_are_skipped() {
    let (model, mut module) = rig(&[BoardKind::Db04], |m| m.swap_pair(0, 0));
    for channel in 0..4 {
        module
            .with_channel(channel, |fixture, module| {
                fixture.set_bool(module, items::ADC_SWAP_DISABLE, true)
            })
            .expect("disable");
    }
    module.boot_fixtures().expect("boot");
    assert_eq!(model.adcctrl(0), Some(0));
}

#[test]
fn db10_boot_initialises_adcs() {
    let (_model, mut module) = rig(&[BoardKind::Db10], |m| m);
    module.boot_fixtures().expect("boot");
    module
        .with_channel(1, |fixture, _| {
            assert!(fixture.has_feature(items::ADC_SWAP_DISABLE));
            Ok(())
        })
        .expect("channel");
}

// ── Offsets ─────────────────────────────────────────────────────────────────

#[test]
fn offsets_converge_on_target() {
    let (model, mut module) = rig(&[BoardKind::Db04, BoardKind::Db10], |m| m);
    module.set_baseline_percent(3, 25.0).expect("percent");
    module.adjust_offsets().expect("adjust");

    let baselines = module.analyze_channel_baselines(1).expect("baselines");
    for (channel, baseline) in baselines.iter().enumerate() {
        let params = module.channel_params(channel).expect("params");
        let range = f64::from(1u32 << baseline.adc_bits());
        #[allow(clippy::cast_possible_truncation)]
        let target = (range * params.baseline_percent / 100.0) as i32;
        assert!(
            *baseline == target,
            "channel {channel}: baseline={:?} target={target}",
            baseline.baseline()
        );
        assert_eq!(model.dac(channel), Some(params.offset_dac));
    }
    // 10% of a 14 bit range on a 2 bit shift.
    assert_eq!(model.dac(0), Some(6552));
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[test]
fn db04_has_no_adc_tests() {
    let (_model, mut module) = rig(&[BoardKind::Db04], |m| m);
    assert!(!module.has_test(tests::ADC_PATTERN_CHECK));
    assert!(!module.has_test(tests::ADC_SWEET_SPOT));
    let (passed, lines) = run_test(&mut module, "adc.unknown");
    assert!(!passed);
    assert_eq!(lines, vec![("invalid test: adc.unknown".to_string(), Level::ERROR)]);
}

#[test]
fn pattern_check_passes_with_good_bitslip() {
    let (model, mut module) = rig(&[BoardKind::Db10], |m| m);
    assert!(module.has_test(tests::ADC_PATTERN_CHECK));
    let (passed, lines) = run_test(&mut module, tests::ADC_PATTERN_CHECK);
    assert!(passed, "{lines:?}");
    for channel in 0..4 {
        assert!(channel_bool(&module, channel, items::ADC_TEST_MODE_RESULT_PASS));
        assert_eq!(model.test_mode(channel), Some(TestMode::Off));
    }
}

#[test]
fn pattern_check_reports_checkerboard_failure() {
    let (model, mut module) = rig(&[BoardKind::Db10], |m| m.with_bitslip_window(4..=9));
    let (passed, lines) = run_test(&mut module, tests::ADC_PATTERN_CHECK);
    assert!(!passed);
    assert!(lines
        .iter()
        .any(|(line, _)| line.starts_with("ADC Test: fail: channel=0 db=0/0 test-mode=checkerboard")));
    module
        .with_channel(0, |fixture, _| {
            assert!(!fixture.has_feature(items::ADC_TEST_MODE_RESULT_PASS));
            Ok(())
        })
        .expect("channel");
    assert_eq!(model.test_mode(0), Some(TestMode::Off));
}

#[test]
fn sweet_spot_centres_bitslip() {
    let (model, mut module) = rig(&[BoardKind::Db10], |m| m.with_bitslip_window(4..=9));
    assert!(module.has_test(tests::ADC_SWEET_SPOT));
    let (passed, lines) = run_test(&mut module, tests::ADC_SWEET_SPOT);
    assert!(passed, "{lines:?}");
    for channel in 0..4 {
        assert_eq!(model.bitslip(channel), Some(6));
        assert_eq!(channel_uint(&module, channel, items::ADC_BITSLIP), 6);
        assert_eq!(model.test_mode(channel), Some(TestMode::Off));
    }
    assert!(lines
        .iter()
        .any(|(line, _)| line.contains("____GGGGGG______   6 [4,9]")));

    let (passed, _) = run_test(&mut module, tests::ADC_PATTERN_CHECK);
    assert!(passed);
}

#[test]
fn sweet_spot_fails_without_window() {
    let (_model, mut module) = rig(&[BoardKind::Db10], |m| m.with_bitslip_window(16..=16));
    let (passed, lines) = run_test(&mut module, tests::ADC_SWEET_SPOT);
    assert!(!passed);
    assert!(lines.iter().any(|(_, level)| *level == Level::ERROR));
}
