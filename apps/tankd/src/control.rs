//! 主循环
//!
//! 每一轮：
//!
//! 1. 调度器执行一轮，得到下次唤醒时间
//! 2. 等待：mio 轮询监听套接字、客户端和 stdin，超时取整到毫秒，
//!    没有事件时用 `spin_sleep` 补足不足一毫秒的部分
//! 3. 收集键盘和网络命令并执行
//! 4. 状态变化时广播 `'k'` 并重绘状态行
//!
//! 调度器的等待时间同时作为 IO 轮询超时，命令到达时提前唤醒循环。

use crate::server::{LISTENER, Server};
use crate::tank::Tank;
use anyhow::{Context, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tank_driver::{Clock, MonotonicClock, Scheduler, SchedulerConfig};
use tank_protocol::Command;
use tank_tools::{HELP_TEXT, Key, KeyAction, KeyboardInput, RawTerminal, action_for_key, redraw};
use tracing::{debug, info, trace, warn};

const KEYBOARD: Token = Token(1);
const FIRST_CLIENT: usize = 2;

/// 主循环参数
#[derive(Debug, Clone)]
pub struct Options {
    pub listen: SocketAddr,
    pub keepalive: Duration,
    pub idle_sleep: Duration,
    pub keyboard: bool,
}

/// 取调度等待和各个截止时刻中最早的一个
fn earliest_wait(
    wait: Duration,
    deadlines: impl IntoIterator<Item = Option<Instant>>,
    now: Instant,
) -> Duration {
    deadlines
        .into_iter()
        .flatten()
        .map(|deadline| deadline.saturating_duration_since(now))
        .fold(wait, Duration::min)
}

/// 等待 IO 事件或超时
///
/// mio 的超时精度为毫秒，剩余部分在没有事件时用 `spin_sleep` 补足。
fn wait_for_events(poll: &mut Poll, events: &mut Events, wait: Duration) -> Result<()> {
    let started = Instant::now();
    let coarse = Duration::from_millis(wait.as_millis() as u64);

    match poll.poll(events, Some(coarse)) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
        Err(e) => return Err(e).context("poll failed"),
    }

    if events.is_empty() {
        let remainder = wait.saturating_sub(started.elapsed());
        if !remainder.is_zero() {
            spin_sleep::sleep(remainder);
        }
    }
    Ok(())
}

/// 按键转换为命令，返回是否请求退出
fn collect_keys(keys: &[Key], commands: &mut Vec<Command>) -> bool {
    let mut quit = false;
    for key in keys {
        match action_for_key(key) {
            KeyAction::Command(cmd) => commands.push(cmd),
            KeyAction::Quit => quit = true,
            KeyAction::Ignore => trace!("ignored key {:?}", key),
        }
    }
    quit
}

fn open_keyboard(registry: &Registry) -> Option<KeyboardInput> {
    let keyboard = match KeyboardInput::open() {
        Ok(keyboard) => keyboard,
        Err(e) => {
            warn!("Failed to open stdin, keyboard disabled: {}", e);
            return None;
        },
    };

    let fd = keyboard.raw_fd();
    match registry.register(&mut SourceFd(&fd), KEYBOARD, Interest::READABLE) {
        Ok(()) => Some(keyboard),
        Err(e) => {
            warn!("stdin cannot be polled, keyboard disabled: {}", e);
            None
        },
    }
}

fn close_keyboard(registry: &Registry, keyboard: KeyboardInput) {
    let fd = keyboard.raw_fd();
    if let Err(e) = registry.deregister(&mut SourceFd(&fd)) {
        debug!("deregister stdin failed: {}", e);
    }
}

/// 运行主循环，直到 `quit` 被置位或键盘按下 `q`
pub fn run(tank: &mut Tank, options: &Options, quit: &AtomicBool) -> Result<()> {
    let mut poll = Poll::new().context("Failed to create poll instance")?;
    let mut events = Events::with_capacity(64);
    let mut server = Server::bind(
        options.listen,
        options.keepalive,
        poll.registry(),
        FIRST_CLIENT,
    )
    .with_context(|| format!("Failed to listen on {}", options.listen))?;

    let mut keyboard = if options.keyboard {
        open_keyboard(poll.registry())
    } else {
        None
    };
    let _raw_terminal = if keyboard.is_some() {
        RawTerminal::enable().context("Failed to switch terminal to raw mode")?
    } else {
        None
    };

    let mut stdout = io::stdout();
    let show_status = stdout.is_terminal();
    let mut last_status = tank.status();
    if show_status {
        println!("{}", HELP_TEXT);
        redraw(&mut stdout, &last_status).context("Failed to write status line")?;
    }

    let clock = MonotonicClock::new();
    let mut scheduler = Scheduler::new(SchedulerConfig {
        idle_sleep: options.idle_sleep,
    });
    let mut commands = Vec::new();
    let mut quit_requested = false;

    info!("Control loop running, remote control on {}", server.local_addr()?);
    while !quit_requested && !quit.load(Ordering::SeqCst) {
        let wakeup = scheduler.run_pass(&mut tank.devices(), clock.now());
        let wait = earliest_wait(
            scheduler.sleep_duration(wakeup),
            [
                server.next_deadline(),
                keyboard.as_ref().and_then(|k| k.deadline()),
            ],
            Instant::now(),
        );
        wait_for_events(&mut poll, &mut events, wait)?;

        let ready_before = server.ready_count();
        let status = tank.status();
        let now = Instant::now();

        for event in events.iter() {
            match event.token() {
                LISTENER => server.accept(poll.registry(), now),
                KEYBOARD => {
                    let Some(input) = keyboard.as_mut() else {
                        continue;
                    };
                    match input.read_keys() {
                        Ok(read) => {
                            quit_requested |= collect_keys(&read.keys, &mut commands);
                            if read.closed {
                                info!("stdin closed, keyboard disabled");
                                if let Some(input) = keyboard.take() {
                                    close_keyboard(poll.registry(), input);
                                }
                            }
                        },
                        Err(e) => {
                            warn!("keyboard read failed, keyboard disabled: {}", e);
                            if let Some(input) = keyboard.take() {
                                close_keyboard(poll.registry(), input);
                            }
                        },
                    }
                },
                token => {
                    server.on_readable(poll.registry(), token, now, &status, &mut commands)
                },
            }
        }

        if let Some(input) = keyboard.as_mut() {
            let keys = input.poll_timeout(now);
            quit_requested |= collect_keys(&keys, &mut commands);
        }
        server.check_liveness(poll.registry(), now);

        for cmd in commands.drain(..) {
            tank.apply(cmd);
        }
        if ready_before > 0 && server.ready_count() == 0 {
            info!("Last remote client gone, stopping tracks");
            tank.stop_drive();
        }

        let status = tank.status();
        if status != last_status {
            server.broadcast(poll.registry(), &status);
            if show_status && let Err(e) = redraw(&mut stdout, &status) {
                warn!("Failed to write status line: {}", e);
            }
            last_status = status;
        }
    }

    info!("Control loop stopped: {:?}", scheduler.stats());
    server.shutdown(poll.registry());
    if let Some(input) = keyboard.take() {
        close_keyboard(poll.registry(), input);
    }
    if show_status {
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earliest_wait_takes_earliest_deadline() {
        let now = Instant::now();
        let wait = Duration::from_millis(10);

        assert_eq!(earliest_wait(wait, [None, None], now), wait);
        assert_eq!(
            earliest_wait(wait, [Some(now + Duration::from_millis(3)), None], now),
            Duration::from_millis(3)
        );
        assert_eq!(
            earliest_wait(wait, [Some(now + Duration::from_secs(30))], now),
            wait
        );
        // 已过期的截止时刻不等待
        assert_eq!(earliest_wait(wait, [Some(now)], now + Duration::from_millis(1)), Duration::ZERO);
    }

    #[test]
    fn test_collect_keys() {
        let mut commands = Vec::new();
        let quit = collect_keys(
            &[Key::Char(b'w'), Key::Up, Key::Char(b'5'), Key::Char(b'1')],
            &mut commands,
        );
        assert!(!quit);
        assert_eq!(
            commands,
            vec![Command::Forward, Command::CameraUp, Command::RedLed]
        );

        assert!(collect_keys(&[Key::Char(b'q')], &mut commands));
    }

    #[test]
    fn test_wait_for_events_sleeps_sub_millisecond_remainder() {
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(4);
        let wait = Duration::from_micros(1500);

        let started = Instant::now();
        wait_for_events(&mut poll, &mut events, wait).unwrap();
        assert!(started.elapsed() >= wait);
        assert!(events.is_empty());
    }
}
