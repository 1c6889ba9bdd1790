mod common;
use common::*;

use apsystems_bridge::coordinator::Phase;
use apsystems_bridge::prelude::*;
use apsystems_bridge::zigbee::command;

#[test]
fn does_nothing_until_restarted() {
    let (mut coordinator, reset) =
        Factory::coordinator(vec![Factory::yc600(0, None)], RadioScript::default());

    assert_eq!(coordinator.phase(), Phase::Stopped);
    assert_eq!(coordinator.tick(), 0);
    assert_eq!(coordinator.tick(), 0);
    assert!(coordinator.transport().sent.is_empty());
    assert!(reset.levels().is_empty());
}

#[test]
fn soft_restart_checks_coordinator_and_goes_idle() {
    let (mut coordinator, reset) =
        Factory::coordinator(vec![Factory::yc600(0, None)], RadioScript::default());
    coordinator.restart(ecu(), false);
    assert_eq!(coordinator.phase(), Phase::Check1);

    let delays: Vec<u64> = (0..4).map(|_| coordinator.tick()).collect();
    assert_eq!(delays, vec![120, 100, 120, 1000]);
    assert_eq!(coordinator.phase(), Phase::Idle);

    assert_eq!(coordinator.transport().sent, vec!["2101".to_string(), "2700".to_string()]);
    assert_eq!(reset.levels(), vec![true]);
}

#[test]
fn hard_restart_initialises_radio() {
    let (mut coordinator, reset) =
        Factory::coordinator(vec![Factory::yc600(0, None)], RadioScript::default());
    coordinator.restart(ecu(), true);
    assert_eq!(coordinator.phase(), Phase::HardReset);

    assert_eq!(coordinator.tick(), 50);
    assert_eq!(coordinator.phase(), Phase::HardReset);
    assert_eq!(reset.levels(), vec![true, false]);

    assert_eq!(coordinator.tick(), 2500);
    assert_eq!(coordinator.phase(), Phase::Initialize);
    assert_eq!(reset.levels(), vec![true, false, true]);

    let ticks = run_until_phase(&mut coordinator, Phase::Idle, 40);
    assert_eq!(ticks, 22);

    let sent = &coordinator.transport().sent;
    for step in 0..command::INITIALIZE_STEPS {
        assert_eq!(sent[step], command::initialize(step, &ecu()).unwrap());
    }
    assert_eq!(sent[8], command::normal_operation(&ecu()));
    assert_eq!(sent[9], "2101");
    assert_eq!(sent[10], "2700");
    assert_eq!(sent.len(), 11);
    assert_eq!(coordinator.stats().hard_resets, 1);
}

#[test]
fn silent_coordinator_is_hard_reset_after_four_pings() {
    let script = RadioScript {
        ping: None,
        ..Default::default()
    };
    let (mut coordinator, reset) = Factory::coordinator(vec![Factory::yc600(0, None)], script);
    coordinator.restart(ecu(), false);

    // each unanswered ping waits out the reader
    for _ in 0..21 {
        coordinator.tick();
    }
    assert_eq!(coordinator.phase(), Phase::Check1);
    assert_eq!(coordinator.session().attempt, 1);
    assert_eq!(coordinator.next_delay_ms(), 700);

    let ticks = run_until_phase(&mut coordinator, Phase::HardReset, 100);
    assert_eq!(ticks, 63);
    assert_eq!(coordinator.transport().sent_starting_with("2101").len(), 4);
    assert_eq!(reset.pulses(), 0);

    coordinator.transport_mut().script.ping = Some(PING_REPLY.to_string());
    run_until_phase(&mut coordinator, Phase::Idle, 40);
    assert_eq!(reset.pulses(), 1);
}

#[test]
fn failed_health_check_retries_then_hard_resets() {
    let script = RadioScript {
        health: Some("FE0E670000FFFF80971B01A3D800000000001F".to_string()),
        ..Default::default()
    };
    let (mut coordinator, _reset) = Factory::coordinator(vec![Factory::yc600(0, None)], script);
    coordinator.restart(ecu(), false);

    coordinator.tick();
    coordinator.tick();
    assert_eq!(coordinator.phase(), Phase::Check2);

    coordinator.tick();
    assert_eq!(coordinator.tick(), 700);
    assert_eq!(coordinator.phase(), Phase::Check2);

    let ticks = run_until_phase(&mut coordinator, Phase::HardReset, 20);
    assert_eq!(ticks, 6);
}

#[test]
fn unanswered_initialisation_goes_back_to_hard_reset() {
    let script = RadioScript {
        init: None,
        ..Default::default()
    };
    let (mut coordinator, reset) = Factory::coordinator(vec![Factory::yc600(0, None)], script);
    coordinator.restart(ecu(), true);

    coordinator.tick();
    coordinator.tick();
    assert_eq!(coordinator.phase(), Phase::Initialize);

    let ticks = run_until_phase(&mut coordinator, Phase::HardReset, 30);
    assert_eq!(ticks, 21);
    assert_eq!(reset.pulses(), 1);

    coordinator.tick();
    assert_eq!(reset.pulses(), 2);
    assert_eq!(reset.levels().last(), Some(&false));
    assert_eq!(coordinator.stats().hard_resets, 2);
}

#[test]
fn restart_after_stop_mid_read_sends_a_fresh_ping() {
    let script = RadioScript {
        ping: None,
        ..Default::default()
    };
    let (mut coordinator, _reset) = Factory::coordinator(vec![Factory::yc600(0, None)], script);
    coordinator.restart(ecu(), false);

    coordinator.tick();
    assert_eq!(coordinator.transport().sent, vec!["2101".to_string()]);
    coordinator.stop();

    coordinator.restart(ecu(), false);
    coordinator.tick();
    assert_eq!(coordinator.transport().sent_starting_with("2101").len(), 2);
}

#[test]
fn idle_coordinator_is_checked_periodically() {
    let (mut coordinator, _reset) =
        Factory::idle_coordinator(vec![Factory::yc600(0, None)], RadioScript::default());
    let sent = coordinator.transport().sent.len();

    for _ in 0..30 {
        assert_eq!(coordinator.tick(), 1000);
    }
    assert_eq!(coordinator.phase(), Phase::Idle);
    assert_eq!(coordinator.transport().sent.len(), sent);

    coordinator.tick();
    assert_eq!(coordinator.phase(), Phase::Check1);

    run_until_phase(&mut coordinator, Phase::Idle, 10);
    assert_eq!(coordinator.transport().sent.len(), sent + 2);
}

#[test]
fn stop_halts_the_engine() -> Result<()> {
    let (mut coordinator, _reset) =
        Factory::idle_coordinator(vec![Factory::yc600(0, Some("103A"))], RadioScript::default());
    coordinator.stop();
    assert_eq!(coordinator.phase(), Phase::Stopped);

    let sent = coordinator.transport().sent.len();
    coordinator.tick();
    assert_eq!(coordinator.transport().sent.len(), sent);
    assert_eq!(coordinator.start_poll(SERIALS[0]), Err(RequestError::Stopped));
    Ok(())
}
