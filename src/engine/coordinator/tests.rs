use std::sync::atomic::AtomicBool;
use std::thread;

use super::*;
use crate::audio::ControlCommand;
use crate::engine::backend::{ManualBackend, ManualClock};
use crate::testing::{EngineLedger, ScriptedFactory};

type TestCoordinator = PlaybackCoordinator<ScriptedFactory, ManualBackend>;

fn coordinator_with(config: AppConfig) -> (Arc<TestCoordinator>, Arc<EngineLedger>, ManualClock) {
    let factory = ScriptedFactory::new();
    let ledger = factory.ledger();
    let backend = ManualBackend::new();
    let clock = backend.clock();
    (
        PlaybackCoordinator::shared(factory, backend, config).unwrap(),
        ledger,
        clock,
    )
}

fn coordinator() -> (Arc<TestCoordinator>, Arc<EngineLedger>, ManualClock) {
    coordinator_with(AppConfig::default())
}

fn play(expression: &str) -> ControlCommand {
    ControlCommand::Play {
        expression: expression.to_string(),
    }
}

#[test]
fn test_ensure_initialized_is_idempotent_for_same_rate() {
    let (coordinator, ledger, clock) = coordinator();

    let first = coordinator.ensure_initialized(44100).unwrap();
    let second = coordinator.ensure_initialized(44100).unwrap();

    assert_eq!(first, second);
    assert_eq!(ledger.builds(), 1);
    assert_eq!(clock.opened_count(), 1);
    assert_eq!(coordinator.current_sample_rate().unwrap(), Some(44100));
    assert_eq!(coordinator.output_sample_rate().unwrap(), Some(44100));
}

#[test]
fn test_zero_sample_rate_is_rejected() {
    let (coordinator, ledger, _clock) = coordinator();
    let err = coordinator.ensure_initialized(0).unwrap_err();
    assert_eq!(err, PlaybackError::InvalidSampleRate { rate: 0 });
    assert_eq!(ledger.builds(), 0);
}

#[test]
fn test_rate_change_rebuilds_context() {
    let (coordinator, _ledger, clock) = coordinator();

    let first = coordinator.ensure_initialized(44100).unwrap();
    let second = coordinator.ensure_initialized(48000).unwrap();

    assert!(second > first);
    assert_eq!(clock.sample_rate(), Some(48000));
    assert_eq!(clock.opened_count(), 2);
    assert_eq!(coordinator.generation().unwrap(), Some(second));
}

#[test]
fn test_engine_build_failure_leaves_coordinator_retryable() {
    let (coordinator, ledger, clock) = coordinator();
    ledger.set_fail_builds(true);

    let err = coordinator.ensure_initialized(44100).unwrap_err();
    assert!(matches!(
        err,
        PlaybackError::Initialization {
            stage: InitStage::Engine,
            ..
        }
    ));
    assert_eq!(coordinator.current_sample_rate().unwrap(), None);
    assert!(!clock.is_open());

    ledger.set_fail_builds(false);
    assert!(coordinator.ensure_initialized(44100).is_ok());
    assert!(clock.is_open());
}

#[test]
fn test_device_open_failure_is_reported() {
    let (coordinator, _ledger, clock) = coordinator();
    coordinator.backend().fail_next_open();

    let err = coordinator.ensure_initialized(44100).unwrap_err();
    assert!(matches!(
        err,
        PlaybackError::Initialization {
            stage: InitStage::OutputDevice,
            ..
        }
    ));
    assert_eq!(coordinator.current_sample_rate().unwrap(), None);

    assert!(coordinator.ensure_initialized(44100).is_ok());
    assert_eq!(clock.opened_count(), 1);
}

#[test]
fn test_validate_expression() {
    let (coordinator, ledger, _clock) = coordinator();
    assert_eq!(
        coordinator.validate_expression("64").unwrap_err(),
        PlaybackError::NotInitialized
    );

    coordinator.ensure_initialized(44100).unwrap();
    assert!(coordinator.validate_expression("64").is_ok());
    assert_eq!(
        coordinator.validate_expression("bad").unwrap_err(),
        PlaybackError::Parse {
            message: "unexpected token".to_string()
        }
    );
    assert_eq!(ledger.live_waveforms(), 0);
}

#[test]
fn test_attach_requires_context() {
    let (coordinator, _ledger, _clock) = coordinator();
    let err = coordinator.attach(ControllerId::new(1)).err();
    assert_eq!(err, Some(PlaybackError::NotInitialized));
}

#[test]
fn test_attach_reports_full_host() {
    let mut config = AppConfig::default();
    config.render.max_controllers = 1;
    let (coordinator, _ledger, _clock) = coordinator_with(config);
    coordinator.ensure_initialized(44100).unwrap();

    let _first = coordinator.attach(ControllerId::new(1)).unwrap();
    let err = coordinator.attach(ControllerId::new(2)).err();
    assert_eq!(err, Some(PlaybackError::TooManyControllers { capacity: 1 }));
}

#[test]
fn test_set_active_stops_previous_holder() {
    let (coordinator, ledger, clock) = coordinator();
    coordinator.ensure_initialized(44100).unwrap();
    let first = coordinator.attach(ControllerId::new(1)).unwrap();
    let second = coordinator.attach(ControllerId::new(2)).unwrap();

    coordinator.set_active(first.link()).unwrap();
    first.link().send(play("100000")).unwrap();
    first.link().set_playing(true);
    clock.tick().unwrap();
    assert_eq!(ledger.live_waveforms(), 1);

    coordinator.set_active(second.link()).unwrap();
    assert!(!first.link().is_playing());
    assert_eq!(
        coordinator.active_controller().unwrap(),
        Some(ControllerId::new(2))
    );

    clock.tick().unwrap();
    assert_eq!(ledger.live_waveforms(), 0);
}

#[test]
fn test_clear_active_only_for_holder() {
    let (coordinator, _ledger, _clock) = coordinator();
    coordinator.ensure_initialized(44100).unwrap();
    let first = coordinator.attach(ControllerId::new(1)).unwrap();
    coordinator.set_active(first.link()).unwrap();

    assert!(!coordinator.clear_active(ControllerId::new(2)).unwrap());
    assert_eq!(
        coordinator.active_controller().unwrap(),
        Some(ControllerId::new(1))
    );

    assert!(coordinator.clear_active(ControllerId::new(1)).unwrap());
    assert_eq!(coordinator.active_controller().unwrap(), None);
    assert!(!coordinator.clear_active(ControllerId::new(1)).unwrap());
}

#[test]
fn test_rate_change_stops_active_without_events() {
    let (coordinator, ledger, clock) = coordinator();
    coordinator.ensure_initialized(44100).unwrap();
    let attachment = coordinator.attach(ControllerId::new(1)).unwrap();
    coordinator.set_active(attachment.link()).unwrap();
    attachment.link().send(play("100000")).unwrap();
    attachment.link().set_playing(true);
    clock.tick().unwrap();

    coordinator.ensure_initialized(48000).unwrap();

    assert!(!attachment.link().is_playing());
    assert_eq!(coordinator.active_controller().unwrap(), None);
    assert_eq!(ledger.live_waveforms(), 0);
}

#[test]
fn test_stop_active_and_shutdown() {
    let (coordinator, ledger, clock) = coordinator();
    coordinator.ensure_initialized(44100).unwrap();
    let attachment = coordinator.attach(ControllerId::new(1)).unwrap();
    coordinator.set_active(attachment.link()).unwrap();
    attachment.link().send(play("100000")).unwrap();
    attachment.link().set_playing(true);
    clock.tick().unwrap();

    coordinator.stop_active().unwrap();
    assert!(!attachment.link().is_playing());
    assert_eq!(coordinator.active_controller().unwrap(), None);
    clock.tick().unwrap();
    assert_eq!(ledger.live_waveforms(), 0);

    coordinator.shutdown().unwrap();
    assert!(!clock.is_open());
    assert_eq!(coordinator.current_sample_rate().unwrap(), None);
    coordinator.shutdown().unwrap();
}

#[test]
fn test_controller_ids_are_unique() {
    let (coordinator, _ledger, _clock) = coordinator();
    let first = coordinator.next_controller_id();
    let second = coordinator.next_controller_id();
    assert_ne!(first, second);
}

#[test]
fn test_reclaim_retired_adapters() {
    let (coordinator, _ledger, clock) = coordinator();
    assert_eq!(coordinator.reclaim_retired().unwrap(), 0);

    coordinator.ensure_initialized(44100).unwrap();
    let attachment = coordinator.attach(ControllerId::new(1)).unwrap();
    clock.tick().unwrap();
    assert_eq!(coordinator.reclaim_retired().unwrap(), 0);

    drop(attachment);
    clock.tick().unwrap();
    assert_eq!(coordinator.reclaim_retired().unwrap(), 1);
    assert_eq!(coordinator.reclaim_retired().unwrap(), 0);
}

#[test]
fn test_invalid_config_is_rejected_at_construction() {
    let zero_sizes: [(&str, fn(&mut AppConfig)); 4] = [
        ("render.block_size", |c| c.render.block_size = 0),
        ("render.generate_batch", |c| c.render.generate_batch = 0),
        ("render.channel_capacity", |c| c.render.channel_capacity = 0),
        ("render.max_controllers", |c| c.render.max_controllers = 0),
    ];

    for (field, zero) in zero_sizes {
        let mut config = AppConfig::default();
        zero(&mut config);
        let result = PlaybackCoordinator::new(ScriptedFactory::new(), ManualBackend::new(), config);

        match result {
            Err(PlaybackError::InvalidConfig { reason }) => {
                assert_eq!(reason, format!("{} must be greater than 0", field));
            }
            Err(other) => panic!("unexpected error for {}: {:?}", field, other),
            Ok(_) => panic!("{} = 0 should be rejected", field),
        }
    }
}

#[test]
fn test_concurrent_rate_requests_leave_one_consistent_context() {
    let (coordinator, ledger, clock) = coordinator();
    coordinator.ensure_initialized(44100).unwrap();
    let attachment = coordinator.attach(ControllerId::new(1)).unwrap();
    coordinator.set_active(attachment.link()).unwrap();
    attachment.link().send(play("1000000")).unwrap();
    attachment.link().set_playing(true);
    clock.tick().unwrap();
    assert_eq!(ledger.live_waveforms(), 1);

    let running = Arc::new(AtomicBool::new(true));
    let ticker = {
        let clock = clock.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                clock.tick();
                thread::yield_now();
            }
        })
    };

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                for round in 0..25 {
                    let rate = if (worker + round) % 2 == 0 { 44100 } else { 48000 };
                    coordinator.ensure_initialized(rate).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // Whichever request came last, the context and the open stream agree
    let settled = coordinator.current_sample_rate().unwrap();
    assert!(matches!(settled, Some(44100) | Some(48000)));
    assert_eq!(clock.sample_rate(), settled);

    let generation = coordinator.ensure_initialized(48000).unwrap();
    running.store(false, Ordering::SeqCst);
    ticker.join().unwrap();

    assert_eq!(coordinator.current_sample_rate().unwrap(), Some(48000));
    assert_eq!(coordinator.output_sample_rate().unwrap(), Some(48000));
    assert_eq!(clock.sample_rate(), Some(48000));
    assert_eq!(coordinator.generation().unwrap(), Some(generation));

    // One stream per build, and only the latest context's validator is alive
    assert_eq!(clock.opened_count() as u64, generation);
    assert_eq!(ledger.live_engines(), 1);

    assert!(!attachment.link().is_playing());
    assert_eq!(coordinator.active_controller().unwrap(), None);
    assert_eq!(ledger.live_waveforms(), 0);
    assert_eq!(coordinator.reclaim_retired().unwrap(), 0);
}
