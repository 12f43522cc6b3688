//! 坦克装配和命令执行
//!
//! 设备按固定顺序参与调度：履带、超声波舵机、云台水平、云台俯仰、超声波测距（可选）。
//! LED 和蜂鸣器不参与调度，命令直接翻转线路电平。

use crate::config::{ServoConfig, TankConfig, TrackSideConfig};
use anyhow::{Context, Result};
use tank_driver::track::TRACK_PERIOD_US;
use tank_driver::{
    Device, DeviceState, DriveCommand, Indicator, Schedulable, ServoAngle, ServoBounds,
    SonicRange, TrackDrive, TrackSide,
};
use tank_gpio::{LineId, LineProvider, OutputLine};
use tank_protocol::{Command, TankStatus};
use tracing::{debug, info, warn};

const TRACK_CONSUMER: &str = "tank-track";
const SERVO_CONSUMER: &str = "tank-servo";
const SONIC_CONSUMER: &str = "tank-sonic";
const INDICATOR_CONSUMER: &str = "tank-indicator";

pub struct Tank {
    track: Device<TrackDrive>,
    sonic_servo: Device<ServoAngle>,
    camera_pan: Device<ServoAngle>,
    camera_tilt: Device<ServoAngle>,
    sonic: Option<Device<SonicRange>>,
    red: Indicator,
    green: Indicator,
    blue: Indicator,
    buzzer: Indicator,
}

fn output(
    provider: &mut dyn LineProvider,
    id: LineId,
    consumer: &str,
    initial: bool,
) -> Result<Box<dyn OutputLine>> {
    provider
        .output(id, consumer, initial)
        .with_context(|| format!("Failed to acquire output line {} for {}", id, consumer))
}

fn track_side(provider: &mut dyn LineProvider, wiring: &TrackSideConfig) -> Result<TrackSide> {
    Ok(TrackSide::new(
        output(provider, wiring.pwm, TRACK_CONSUMER, false)?,
        output(provider, wiring.dir_a, TRACK_CONSUMER, false)?,
        output(provider, wiring.dir_b, TRACK_CONSUMER, false)?,
    ))
}

fn servo(
    provider: &mut dyn LineProvider,
    name: &str,
    config: &ServoConfig,
) -> Result<Device<ServoAngle>> {
    let bounds = ServoBounds::new(config.min, config.max, config.default)
        .with_context(|| format!("Invalid bounds for servo {}", name))?;
    let line = output(provider, config.line, SERVO_CONSUMER, false)?;
    Ok(Device::servo(name, line, bounds))
}

fn indicator(
    provider: &mut dyn LineProvider,
    name: &str,
    id: LineId,
    active_low: bool,
) -> Result<Indicator> {
    let line = output(provider, id, INDICATOR_CONSUMER, Indicator::off_level(active_low))?;
    Ok(Indicator::new(name, line, active_low))
}

/// 占空时间换算为百分比
fn percent(duty: i32) -> i16 {
    (100 * duty / TRACK_PERIOD_US) as i16
}

fn saturate_i8(value: i32) -> i8 {
    value.clamp(i8::MIN.into(), i8::MAX.into()) as i8
}

impl Tank {
    /// 申请所有线路并创建设备
    ///
    /// 任何线路申请失败都中止装配，已申请的线路随已创建的对象一起释放。
    /// 舵机创建后立即启动（输出默认角度），超声波按配置的模式启动。
    pub fn assemble(config: &TankConfig, provider: &mut dyn LineProvider) -> Result<Self> {
        let red = indicator(provider, "red", config.indicators.red, false)?;
        let green = indicator(provider, "green", config.indicators.green, false)?;
        let blue = indicator(provider, "blue", config.indicators.blue, false)?;
        let buzzer = indicator(
            provider,
            "buzzer",
            config.indicators.buzzer,
            config.indicators.buzzer_active_low,
        )?;

        let right = track_side(provider, &config.track.right)?;
        let left = track_side(provider, &config.track.left)?;
        let mut track = Device::new("track", TrackDrive::new(right, left));
        track.start().context("Failed to start track")?;

        let sonic_servo = servo(provider, "sonic_servo", &config.servos.sonic)?;
        let camera_pan = servo(provider, "camera_pan", &config.servos.camera_pan)?;
        let camera_tilt = servo(provider, "camera_tilt", &config.servos.camera_tilt)?;

        let sonic = match &config.sonic {
            Some(wiring) => {
                let trigger = output(provider, wiring.trigger, SONIC_CONSUMER, false)?;
                let echo = provider
                    .input(wiring.echo, SONIC_CONSUMER)
                    .with_context(|| format!("Failed to acquire input line {}", wiring.echo))?;
                let mut dev = Device::new("sonic", SonicRange::new(trigger, echo));
                dev.set_mode(wiring.mode);
                dev.start().context("Failed to start sonic")?;
                Some(dev)
            },
            None => {
                debug!("No sonic range finder configured");
                None
            },
        };

        info!(
            "Tank assembled: {} scheduled devices",
            if sonic.is_some() { 5 } else { 4 }
        );

        Ok(Self {
            track,
            sonic_servo,
            camera_pan,
            camera_tilt,
            sonic,
            red,
            green,
            blue,
            buzzer,
        })
    }

    /// 调度顺序下的设备列表
    pub fn devices(&mut self) -> Vec<&mut dyn Schedulable> {
        let mut devices: Vec<&mut dyn Schedulable> = vec![
            &mut self.track as &mut dyn Schedulable,
            &mut self.sonic_servo,
            &mut self.camera_pan,
            &mut self.camera_tilt,
        ];
        if let Some(sonic) = self.sonic.as_mut() {
            devices.push(sonic);
        }
        devices
    }

    #[cfg(test)]
    pub fn track(&self) -> &Device<TrackDrive> {
        &self.track
    }

    /// 执行一条遥控命令
    ///
    /// 只更新目标值（LED / 蜂鸣器除外），实际波形在下一轮调度中生效。
    pub fn apply(&mut self, cmd: Command) {
        debug!("apply {:?}", cmd);
        match cmd {
            Command::Forward => self.track.apply(DriveCommand::Forward),
            Command::Backward => self.track.apply(DriveCommand::Backward),
            Command::TurnLeft => self.track.apply(DriveCommand::TurnLeft),
            Command::TurnRight => self.track.apply(DriveCommand::TurnRight),
            Command::Stop => self.track.apply(DriveCommand::Stop),

            Command::SonicLeft => self.sonic_servo.nudge(1),
            Command::SonicRight => self.sonic_servo.nudge(-1),
            Command::SonicCentre => self.sonic_servo.centre(),

            Command::CameraLeft => self.camera_pan.nudge(1),
            Command::CameraRight => self.camera_pan.nudge(-1),
            Command::CameraUp => self.camera_tilt.nudge(1),
            Command::CameraDown => self.camera_tilt.nudge(-1),
            Command::CameraCentre => {
                self.camera_pan.centre();
                self.camera_tilt.centre();
            },

            Command::RedLed => toggle(&mut self.red),
            Command::GreenLed => toggle(&mut self.green),
            Command::BlueLed => toggle(&mut self.blue),
            Command::Buzzer => toggle(&mut self.buzzer),

            Command::SonicOneShot | Command::SonicContinuous => {
                debug!("reserved command {:?} ignored", cmd);
            },
            Command::LivenessAck => {},
        }
    }

    /// 让履带停车（不会启动已停止的履带）
    pub fn stop_drive(&mut self) {
        if self.track.state() != DeviceState::Stopped {
            self.track.apply(DriveCommand::Stop);
        }
    }

    /// 当前状态快照
    pub fn status(&self) -> TankStatus {
        let sonic_distance = self
            .sonic
            .as_ref()
            .and_then(|sonic| sonic.distance())
            .map_or(-1, |cm| cm as i16);

        TankStatus {
            right_speed_pct: percent(self.track.speed_right()),
            left_speed_pct: percent(self.track.speed_left()),
            sonic_distance,
            sonic_servo_offset: saturate_i8(self.sonic_servo.offset()),
            camera_pan_offset: saturate_i8(self.camera_pan.offset()),
            camera_tilt_offset: saturate_i8(self.camera_tilt.offset()),
            ..TankStatus::default()
        }
        .with_indicators(
            self.red.is_on(),
            self.green.is_on(),
            self.blue.is_on(),
            self.buzzer.is_on(),
        )
    }

    /// 关闭 LED 和蜂鸣器，强制释放所有设备
    pub fn shutdown(&mut self) {
        self.red.release();
        self.green.release();
        self.blue.release();
        self.buzzer.release();

        let mut result = vec![
            self.track.teardown(true),
            self.sonic_servo.teardown(true),
            self.camera_pan.teardown(true),
            self.camera_tilt.teardown(true),
        ];
        if let Some(sonic) = self.sonic.as_mut() {
            result.push(sonic.teardown(true));
        }
        for err in result.into_iter().filter_map(Result::err) {
            warn!("teardown failed: {}", err);
        }
        info!("Tank shut down");
    }
}

fn toggle(indicator: &mut Indicator) {
    match indicator.toggle() {
        Ok(on) => debug!("{} {}", indicator.name(), if on { "on" } else { "off" }),
        Err(e) => warn!("{}: toggle failed: {}", indicator.name(), e),
    }
}
