mod common;

use common::*;
use mpos::memory::VideoTarget;
use mpos::platform::PhysMemory;
use mpos::syscalls::IoOutcome;
use x86_64::PhysAddr;

const ENTER: u8 = 0x1C;
const BACKSPACE: u8 = 0x0E;
const LALT_DOWN: u8 = 0x38;
const LALT_UP: u8 = 0xB8;
const LCTRL_DOWN: u8 = 0x1D;
const LCTRL_UP: u8 = 0x9D;
const F2: u8 = 0x3C;
const F3: u8 = 0x3D;

/// Press and release each key.
fn tap(kernel: &mut SimKernel, keys: &[u8]) {
    for &key in keys {
        kernel.keyboard(key);
        kernel.keyboard(key | 0x80);
    }
}

fn live(kernel: &SimKernel) -> Vec<u8> {
    screen_text(kernel, kernel.memory().video().live)
}

/// Three ticks start a base shell on every terminal.
fn all_running() -> SimKernel {
    let mut kernel = boot();
    for _ in 0..3 {
        kernel.tick();
    }
    kernel
}

#[test]
fn typed_line_is_echoed_and_handed_to_read() {
    let mut kernel = boot();
    launch(&mut kernel, "shell");
    assert!(matches!(kernel.read(0, scratch(0), 128), Ok(IoOutcome::Blocked(_))));

    // h, i
    tap(&mut kernel, &[0x23, 0x17]);
    assert!(live(&kernel).starts_with(b"hi"));
    assert!(matches!(kernel.read(0, scratch(0), 128), Ok(IoOutcome::Blocked(_))));

    tap(&mut kernel, &[ENTER]);
    assert!(kernel.signals().line_ready[0].is_raised());
    assert_eq!(done(kernel.read(0, scratch(0), 128)), 3);
    let mut line = [0u8; 3];
    kernel.copy_from_user(scratch(0), &mut line).unwrap();
    assert_eq!(&line, b"hi\n");

    assert!(kernel.terminals().get(0).unwrap().line().is_empty());
    assert!(!kernel.signals().line_ready[0].is_raised());
    assert!(matches!(kernel.read(0, scratch(0), 128), Ok(IoOutcome::Blocked(_))));
}

#[test]
fn short_reads_discard_the_rest_of_the_line() {
    let mut kernel = boot();
    launch(&mut kernel, "shell");
    // a, b, backspace, c, enter
    tap(&mut kernel, &[0x1E, 0x30, BACKSPACE, 0x2E, ENTER]);
    assert_eq!(kernel.terminals().get(0).unwrap().line(), b"ac\n");

    assert_eq!(done(kernel.read(0, scratch(0), 1)), 1);
    let mut first = [0u8; 1];
    kernel.copy_from_user(scratch(0), &mut first).unwrap();
    assert_eq!(&first, b"a");
    assert!(matches!(kernel.read(0, scratch(0), 128), Ok(IoOutcome::Blocked(_))));
}

#[test]
fn line_buffer_keeps_room_for_the_newline() {
    let mut kernel = boot();
    launch(&mut kernel, "shell");
    for _ in 0..130 {
        tap(&mut kernel, &[0x1E]);
    }
    assert_eq!(kernel.terminals().get(0).unwrap().line().len(), 127);
    tap(&mut kernel, &[ENTER]);
    let line = kernel.terminals().get(0).unwrap().line();
    assert_eq!(line.len(), 128);
    assert_eq!(line[127], b'\n');
}

#[test]
fn ctrl_l_clears_and_keeps_the_pending_line() {
    let mut kernel = boot();
    launch(&mut kernel, "shell");
    kernel.copy_to_user(scratch(0), b"junk\n").unwrap();
    done(kernel.write(1, scratch(0), 5));
    // x
    tap(&mut kernel, &[0x2D]);

    kernel.keyboard(LCTRL_DOWN);
    tap(&mut kernel, &[0x26]);
    kernel.keyboard(LCTRL_UP);

    let text = live(&kernel);
    assert_eq!(text[0], b'x');
    assert!(text[1..].iter().all(|&b| b == b' '));
    assert_eq!(kernel.platform().cursor, (1, 0));
    assert_eq!(kernel.terminals().get(0).unwrap().line(), b"x");
}

#[test]
fn background_output_lands_in_the_private_page() {
    let mut kernel = all_running();
    assert_eq!(kernel.executing(), Some(2));
    assert_eq!(kernel.terminals().foreground(), 0);

    kernel.copy_to_user(scratch(0), b"two").unwrap();
    done(kernel.write(1, scratch(0), 3));
    let private = screen_text(&kernel, PhysAddr::new(TERMINAL_PAGES[2]));
    assert!(private.starts_with(b"two"));
    assert!(!contains(&live(&kernel), b"two"));
}

#[test]
fn alt_function_key_swaps_the_visible_screen() {
    let mut kernel = all_running();
    kernel.copy_to_user(scratch(0), b"two").unwrap();
    done(kernel.write(1, scratch(0), 3));
    assert_eq!(kernel.memory().video_target(), VideoTarget::Terminal(2));

    kernel.keyboard(LALT_DOWN);
    tap(&mut kernel, &[F3]);
    kernel.keyboard(LALT_UP);

    assert_eq!(kernel.terminals().foreground(), 2);
    assert!(live(&kernel).starts_with(b"two"));
    assert_eq!(kernel.platform().cursor, (3, 0));
    // the executing terminal became visible, so it draws live now
    assert_eq!(kernel.memory().video_target(), VideoTarget::Foreground);
    // the scheduler is not disturbed
    assert_eq!(kernel.executing(), Some(2));

    // without alt the function key is ignored
    tap(&mut kernel, &[F2]);
    assert_eq!(kernel.terminals().foreground(), 2);
}

#[test]
fn screen_contents_survive_a_round_trip() {
    let mut kernel = all_running();
    kernel.tick();
    assert_eq!(kernel.executing(), Some(0));
    kernel.copy_to_user(scratch(0), b"zero").unwrap();
    done(kernel.write(1, scratch(0), 4));

    kernel.switch_terminal(1);
    assert!(!contains(&live(&kernel), b"zero"));
    let saved = screen_text(&kernel, PhysAddr::new(TERMINAL_PAGES[0]));
    assert!(saved.starts_with(b"zero"));

    kernel.switch_terminal(0);
    assert!(live(&kernel).starts_with(b"zero"));
}

#[test]
fn idle_or_unknown_terminals_are_not_switched_to() {
    let mut kernel = boot();
    launch(&mut kernel, "shell");
    kernel.switch_terminal(1);
    assert_eq!(kernel.terminals().foreground(), 0);
    kernel.switch_terminal(7);
    assert_eq!(kernel.terminals().foreground(), 0);
}

#[test]
fn keys_go_to_the_foreground_terminal_only() {
    let mut kernel = all_running();
    // a, enter
    tap(&mut kernel, &[0x1E, ENTER]);
    assert_eq!(kernel.terminals().get(0).unwrap().line(), b"a\n");
    assert!(kernel.signals().line_ready[0].is_raised());
    assert!(!kernel.signals().line_ready[2].is_raised());

    // terminal 2 is executing but has nothing typed
    assert!(matches!(kernel.read(0, scratch(0), 128), Ok(IoOutcome::Blocked(_))));
}

#[test]
fn terminals_draw_with_their_own_attribute() {
    let mut kernel = all_running();
    kernel.copy_to_user(scratch(0), b"c").unwrap();
    done(kernel.write(1, scratch(0), 1));
    let attribute = kernel.terminals().get(2).unwrap().attribute();
    let cell = kernel.platform().phys(PhysAddr::new(TERMINAL_PAGES[2]), 2);
    assert_eq!(cell, &[b'c', attribute]);
    assert_ne!(attribute, kernel.terminals().get(0).unwrap().attribute());
}

#[test]
fn finished_line_is_frozen_until_read() {
    let mut kernel = boot();
    launch(&mut kernel, "shell");
    // h, i, enter, then backspace, x, enter on the finished line
    tap(&mut kernel, &[0x23, 0x17, ENTER, BACKSPACE, 0x2D, ENTER]);
    assert_eq!(kernel.terminals().get(0).unwrap().line(), b"hi\n");
    assert_ne!(live(&kernel)[80], b'x');
    assert_eq!(kernel.platform().cursor, (0, 1));

    assert_eq!(done(kernel.read(0, scratch(0), 128)), 3);
    let mut line = [0u8; 3];
    kernel.copy_from_user(scratch(0), &mut line).unwrap();
    assert_eq!(&line, b"hi\n");

    // editing resumes once the line is consumed
    tap(&mut kernel, &[0x2D]);
    assert_eq!(kernel.terminals().get(0).unwrap().line(), b"x");
    assert_eq!(live(&kernel)[80], b'x');
}
