use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use lowlevel_input::message::*;
use lowlevel_input::mock::MockBinding;
use lowlevel_input::{
    ExitNotifier, HookError, HookKind, InputManager, Key, KeyState, KeyboardData, MouseData,
    RawEvent,
};

const IDLE: Duration = Duration::from_secs(5);

fn setup() -> (Arc<MockBinding>, InputManager) {
    let mock = Arc::new(MockBinding::new());
    let manager = InputManager::builder()
        .binding(mock.clone())
        .lifecycle(Arc::new(ExitNotifier::new()))
        .build()
        .unwrap();
    (mock, manager)
}

fn press(mock: &MockBinding, message: u32, key: Key) {
    let data = KeyboardData {
        vk_code: key.code() as u32,
        ..Default::default()
    };
    mock.inject(HookKind::Keyboard, RawEvent::keyboard(message, data));
    assert!(mock.wait_idle(IDLE));
}

fn mouse(mock: &MockBinding, message: u32, mouse_data: u32) {
    let data = MouseData {
        x: 100,
        y: 200,
        mouse_data,
        ..Default::default()
    };
    mock.inject(HookKind::Mouse, RawEvent::mouse(message, data));
    assert!(mock.wait_idle(IDLE));
}

#[test]
fn state_reflects_latest_event_with_pressed_collapse() {
    let (mock, manager) = setup();
    let mut seed: u32 = 0x1234_5678;
    let mut expected = KeyState::Up;

    for _ in 0..200 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let down = (seed >> 16) & 1 == 1;
        if down {
            press(&mock, WM_KEYDOWN, Key::A);
            expected = KeyState::Down;
        } else {
            press(&mock, WM_KEYUP, Key::A);
            expected = if expected == KeyState::Down {
                KeyState::Pressed
            } else {
                KeyState::Up
            };
        }
        assert_eq!(manager.get_state(Key::A), expected);
    }
}

#[test]
fn was_pressed_reports_each_cycle_once() {
    let (mock, manager) = setup();
    for _ in 0..3 {
        assert!(!manager.was_pressed(Key::RETURN));
        press(&mock, WM_KEYDOWN, Key::RETURN);
        assert!(!manager.was_pressed(Key::RETURN));
        press(&mock, WM_KEYUP, Key::RETURN);
        assert!(manager.was_pressed(Key::RETURN));
        assert!(!manager.was_pressed(Key::RETURN));
    }
}

#[test]
fn system_keys_count_as_plain_keys() {
    let (mock, manager) = setup();
    press(&mock, WM_SYSKEYDOWN, Key::LMENU);
    assert!(manager.is_pressed(Key::LMENU));
    press(&mock, WM_SYSKEYUP, Key::LMENU);
    assert!(manager.was_pressed(Key::LMENU));
}

#[test]
fn install_twice_keeps_one_registration() {
    let (mock, manager) = setup();
    assert!(!manager.install_hooks().unwrap());
    assert_eq!(mock.registration_count(HookKind::Keyboard), 1);
    assert_eq!(mock.registration_count(HookKind::Mouse), 1);

    assert!(manager.uninstall_hooks().unwrap());
    assert!(manager.install_hooks().unwrap());
    assert!(!manager.install_hooks().unwrap());
    assert_eq!(mock.handle_count(), 2);
}

#[test]
fn reinstall_uses_fresh_pump_threads() {
    let (mock, manager) = setup();
    let keyboard_before = mock.registered_threads(HookKind::Keyboard);
    let mouse_before = mock.registered_threads(HookKind::Mouse);

    assert!(manager.uninstall_hooks().unwrap());
    assert_eq!(mock.handle_count(), 0);
    assert!(!manager.uninstall_hooks().unwrap());

    assert!(manager.install_hooks().unwrap());
    let keyboard_after = mock.registered_threads(HookKind::Keyboard);
    let mouse_after = mock.registered_threads(HookKind::Mouse);
    assert_eq!(keyboard_after.len(), 1);
    assert_eq!(mouse_after.len(), 1);
    assert_ne!(keyboard_before, keyboard_after);
    assert_ne!(mouse_before, mouse_after);
    assert_ne!(keyboard_after, mouse_after);
    assert_eq!(mock.affinity_violations(), 0);
}

#[test]
fn install_failure_is_an_error() {
    let mock = Arc::new(MockBinding::new());
    mock.fail_next_registration();
    let result = InputManager::builder()
        .binding(mock.clone())
        .lifecycle(Arc::new(ExitNotifier::new()))
        .build();
    let err = result.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<HookError>(),
        Some(HookError::InstallFailed { .. })
    ));
    assert_eq!(mock.handle_count(), 0);
}

#[test]
fn lost_quit_is_reported_as_join_timeout() {
    let mock = Arc::new(MockBinding::new());
    let manager = InputManager::builder()
        .binding(mock.clone())
        .lifecycle(Arc::new(ExitNotifier::new()))
        .join_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    mock.stall_quit(true);
    assert!(matches!(
        manager.uninstall_hooks(),
        Err(HookError::JoinTimeout { .. })
    ));
    assert!(manager.is_installed());

    mock.stall_quit(false);
    assert!(manager.uninstall_hooks().unwrap());
    assert_eq!(mock.handle_count(), 0);
}

#[test]
fn wait_with_zero_timeout_fails_fast() {
    let (_mock, manager) = setup();
    assert!(!manager.wait_for_event(Key::A, KeyState::Down, Some(Duration::ZERO)));
}

#[test]
fn wait_sees_concurrent_event() {
    let (mock, manager) = setup();
    let manager = Arc::new(manager);
    let (started_tx, started_rx) = mpsc::channel();

    let waiter = Arc::clone(&manager);
    let handle = thread::spawn(move || {
        started_tx.send(()).unwrap();
        waiter.wait_for_event(Key::A, KeyState::Down, Some(IDLE))
    });
    started_rx.recv().unwrap();

    // Keep injecting until the waiter has returned; a Down sent before it registered
    // would be missed, one sent after must not be.
    while !handle.is_finished() {
        press(&mock, WM_KEYDOWN, Key::A);
        press(&mock, WM_KEYUP, Key::A);
        thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.join().unwrap());
}

#[test]
fn wait_for_down_succeeds_when_already_held() {
    let (mock, manager) = setup();
    mouse(&mock, WM_LBUTTONDOWN, 0);
    assert!(manager.wait_for_event(Key::LBUTTON, KeyState::Down, Some(Duration::ZERO)));
}

#[test]
fn concurrent_registry_changes_during_dispatch() {
    let (mock, manager) = setup();
    let manager = Arc::new(manager);
    let violations = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicBool::new(true));

    let injector = {
        let mock = Arc::clone(&mock);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                for key in [Key::A, Key::Z] {
                    let data = KeyboardData {
                        vk_code: key.code() as u32,
                        ..Default::default()
                    };
                    mock.inject(HookKind::Keyboard, RawEvent::keyboard(WM_KEYDOWN, data));
                    mock.inject(HookKind::Keyboard, RawEvent::keyboard(WM_KEYUP, data));
                }
                thread::yield_now();
            }
        })
    };

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let manager = Arc::clone(&manager);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                let key = if n % 2 == 0 { Key::A } else { Key::Z };
                let mut kept = 0;
                for round in 0..50 {
                    let removed = Arc::new(AtomicBool::new(false));
                    let flag = Arc::clone(&removed);
                    let seen = Arc::clone(&violations);
                    let id = manager.register_event(key, move |_, _| {
                        if flag.load(Ordering::SeqCst) {
                            seen.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                    if round % 5 == 0 {
                        kept += 1;
                        continue;
                    }
                    assert!(manager.remove_event(key, id));
                    removed.store(true, Ordering::SeqCst);
                }
                kept
            })
        })
        .collect();

    let kept: usize = workers.into_iter().map(|h| h.join().unwrap()).sum();
    running.store(false, Ordering::SeqCst);
    injector.join().unwrap();
    assert!(mock.wait_idle(IDLE));

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(
        manager.callback_count(Key::A) + manager.callback_count(Key::Z),
        kept
    );
}

#[test]
fn callbacks_for_a_key_run_in_event_order() {
    let (mock, manager) = setup();
    let (tx, rx) = mpsc::channel();
    manager.register_event(Key::SPACE, move |state, _| tx.send(state).unwrap());

    for _ in 0..20 {
        press(&mock, WM_KEYDOWN, Key::SPACE);
        press(&mock, WM_KEYUP, Key::SPACE);
    }
    for _ in 0..20 {
        assert_eq!(rx.recv_timeout(IDLE).unwrap(), KeyState::Down);
        assert_eq!(rx.recv_timeout(IDLE).unwrap(), KeyState::Up);
    }
}

#[test]
fn panicking_callback_is_isolated() {
    let (mock, manager) = setup();
    let (tx, rx) = mpsc::channel();
    manager.register_event(Key::A, |_, _| panic!("callback failure"));
    manager.register_event(Key::A, move |state, _| tx.send(state).unwrap());

    press(&mock, WM_KEYDOWN, Key::A);
    press(&mock, WM_KEYUP, Key::A);
    assert_eq!(rx.recv_timeout(IDLE).unwrap(), KeyState::Down);
    assert_eq!(rx.recv_timeout(IDLE).unwrap(), KeyState::Up);
    assert!(manager.was_pressed(Key::A));
}

#[test]
fn every_hook_call_is_chained() {
    let (mock, manager) = setup();
    manager.register_event(Key::A, |_, _| panic!("callback failure"));
    manager.set_capture_mouse_move(false);

    press(&mock, WM_KEYDOWN, Key::A);
    press(&mock, 0x0102, Key::A);
    mouse(&mock, WM_MOUSEMOVE, 0);
    mouse(&mock, WM_MOUSEWHEEL, 0xFF88_0000);
    assert_eq!(mock.chain_count(), 4);
}

#[test]
fn wheel_click_flag_lasts_one_dispatch() {
    let (mock, manager) = setup();
    mouse(&mock, WM_MOUSEWHEEL, 120);
    assert!(manager.mouse_buttons().middle);

    mouse(&mock, WM_MOUSEMOVE, 0);
    assert!(!manager.mouse_buttons().middle);
    assert!(!manager.is_pressed(Key::MBUTTON));
    assert!(manager.was_pressed(Key::MBUTTON));
}

#[test]
fn mouse_double_click_is_a_full_press() {
    let (mock, manager) = setup();
    let (tx, rx) = mpsc::channel();
    manager.subscribe_mouse(move |event| tx.send(event).unwrap());

    mouse(&mock, WM_LBUTTONDBLCLK, 0);
    assert!(manager.was_pressed(Key::LBUTTON));
    let down = rx.recv_timeout(IDLE).unwrap();
    let up = rx.recv_timeout(IDLE).unwrap();
    assert_eq!(down.button(), Some((KeyState::Down, Key::LBUTTON)));
    assert_eq!(up.button(), Some((KeyState::Up, Key::LBUTTON)));
    assert_eq!((down.x, down.y), (100, 200));
}

#[test]
fn exit_signal_releases_hooks() {
    let mock = Arc::new(MockBinding::new());
    let notifier = Arc::new(ExitNotifier::new());
    let manager = InputManager::builder()
        .binding(mock.clone())
        .lifecycle(notifier.clone())
        .build()
        .unwrap();
    assert_eq!(mock.handle_count(), 2);

    notifier.notify();
    assert_eq!(mock.handle_count(), 0);
    assert!(manager.is_disposed());
    assert!(matches!(manager.install_hooks(), Err(HookError::Disposed)));
}

#[test]
fn dispose_wakes_blocked_waiters() {
    let (_mock, manager) = setup();
    let manager = Arc::new(manager);
    let (started_tx, started_rx) = mpsc::channel();
    let waiter = Arc::clone(&manager);
    let handle = thread::spawn(move || {
        started_tx.send(()).unwrap();
        waiter.wait_for_next_event(None)
    });
    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));

    manager.dispose();
    assert_eq!(handle.join().unwrap(), None);
}

#[test]
fn crate_metadata() {
    assert_eq!(lowlevel_input::NAME, "lowlevel-input");
    assert!(!lowlevel_input::VERSION.is_empty());
}
