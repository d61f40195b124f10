use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::io::{self, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
        PositionTargetTypemask, COMMAND_ACK_DATA, COMMAND_LONG_DATA, HEARTBEAT_DATA,
        SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    error::MessageReadError,
    MavConnection, MavHeader, MavlinkVersion,
};
use ofb_proto::{setpoint::Setpoint, status::VehicleStatus};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_serial::SerialPort;
use tracing::{debug, info, warn};

use crate::control::ControlPlane;
use crate::state::TelemetryMirror;
use crate::{px4_mode, LinkConfig, LinkError};

type Conn = dyn MavConnection<MavMessage> + Sync + Send;

const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Outgoing half of the link.
///
/// mavlink's own serial connection reads and writes under one port lock, so a
/// quiet autopilot would hold up every send. Serial links get two handles on
/// the port instead.
enum Writer {
    Conn(Arc<Conn>),
    Stream(Mutex<Box<dyn Write + Send>>),
}

impl Writer {
    fn send(&self, hdr: MavHeader, msg: &MavMessage) -> Result<()> {
        match self {
            Writer::Conn(conn) => {
                conn.send(&hdr, msg).context("mavlink send")?;
            }
            Writer::Stream(port) => {
                let mut port = port.lock().map_err(|_| anyhow!("mavlink writer poisoned"))?;
                mavlink::write_versioned_msg(&mut *port, MavlinkVersion::V2, hdr, msg).context("mavlink send")?;
            }
        }
        Ok(())
    }
}

/// Incoming half of the link, owned by the reader thread.
enum Reader {
    Conn(Arc<Conn>),
    Stream(BufReader<Box<dyn Read + Send>>),
}

impl Reader {
    fn recv(&mut self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        match self {
            Reader::Conn(conn) => conn.recv(),
            Reader::Stream(port) => mavlink::read_versioned_msg(port, MavlinkVersion::V2),
        }
    }

    /// Whether `err` means the link is gone for good.
    fn is_fatal(&self, err: &MessageReadError) -> bool {
        match (self, err) {
            (Reader::Stream(_), MessageReadError::Io(e)) => !matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

fn stream_halves(read: Box<dyn Read + Send>, write: Box<dyn Write + Send>) -> (Writer, Reader) {
    (Writer::Stream(Mutex::new(write)), Reader::Stream(BufReader::new(read)))
}

fn open_serial(dev: &str, baud: u32) -> Result<(Writer, Reader)> {
    let port = tokio_serial::new(dev, baud)
        .timeout(SERIAL_READ_TIMEOUT)
        .open()
        .with_context(|| format!("open fc serial device {}", dev))?;
    let read_half: Box<dyn SerialPort> = port.try_clone().with_context(|| format!("clone fc serial handle {}", dev))?;
    Ok(stream_halves(Box::new(read_half), Box::new(port)))
}

struct Shared {
    writer: Writer,
    sys_id: u8,
    comp_id: u8,
    sequence: AtomicU8,
    target_sys: u8,
    target_comp: u8,
    boot: Instant,
    /// ms since boot of the last autopilot heartbeat, +1 (0 = never)
    last_heartbeat: AtomicU64,
    stop: AtomicBool,
}

impl Shared {
    fn send(&self, msg: &MavMessage) -> Result<()> {
        let hdr = MavHeader {
            system_id: self.sys_id,
            component_id: self.comp_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.writer.send(hdr, msg)
    }

    fn touch_heartbeat(&self) {
        let ms = self.boot.elapsed().as_millis() as u64;
        self.last_heartbeat.store(ms + 1, Ordering::Relaxed);
    }

    fn heartbeat_age(&self) -> Option<Duration> {
        match self.last_heartbeat.load(Ordering::Relaxed) {
            0 => None,
            seen => Some(self.boot.elapsed().saturating_sub(Duration::from_millis(seen - 1))),
        }
    }
}

/// MAVLink link to a PX4 autopilot, acting as the control loop's [`ControlPlane`].
///
/// A reader thread feeds HEARTBEATs into the [`TelemetryMirror`] and hands
/// COMMAND_ACKs to whichever command call is waiting for them. The reader owns
/// the only ack sender, so command calls see [`LinkError::ReaderStopped`] once
/// it exits.
pub struct MavPlane {
    shared: Arc<Shared>,
    mirror: TelemetryMirror,
    /// Handed to the reader thread by [`MavPlane::start`].
    pending: Option<(Reader, broadcast::Sender<COMMAND_ACK_DATA>)>,
    acks: broadcast::Receiver<COMMAND_ACK_DATA>,
    tasks: Vec<JoinHandle<()>>,
}

impl MavPlane {
    pub fn connect(url: &str, cfg: &LinkConfig, mirror: TelemetryMirror) -> Result<Self> {
        let (writer, reader) = match serial_target(url) {
            Some((dev, baud)) => open_serial(dev, baud)?,
            None => {
                let conn: Arc<Conn> = mavlink::connect::<MavMessage>(url)
                    .with_context(|| format!("mavlink connect {}", url))?
                    .into();
                (Writer::Conn(conn.clone()), Reader::Conn(conn))
            }
        };
        info!("fc: link open on {}", url);
        Ok(Self::with_halves(writer, reader, cfg, mirror))
    }

    fn with_halves(writer: Writer, reader: Reader, cfg: &LinkConfig, mirror: TelemetryMirror) -> Self {
        let (ack_tx, acks) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                writer,
                sys_id: cfg.sys_id,
                comp_id: cfg.comp_id,
                sequence: AtomicU8::new(0),
                target_sys: cfg.target_sys,
                target_comp: cfg.target_comp,
                boot: Instant::now(),
                last_heartbeat: AtomicU64::new(0),
                stop: AtomicBool::new(false),
            }),
            mirror,
            pending: Some((reader, ack_tx)),
            acks,
            tasks: Vec::new(),
        }
    }

    /// Starts the telemetry reader, companion heartbeat and connection watchdog.
    pub fn start(&mut self, cfg: &LinkConfig) -> Result<()> {
        let (reader, ack_tx) = self.pending.take().context("mavlink link already started")?;
        let shared = self.shared.clone();
        let mirror = self.mirror.clone();
        // mavlink recv blocks without a deadline; a plain thread keeps runtime shutdown from waiting on it.
        std::thread::Builder::new()
            .name("mav-reader".into())
            .spawn(move || read_loop(reader, &shared, &mirror, ack_tx))
            .context("spawn mavlink reader")?;

        let hb_hz = cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
        let timeout = cfg.connection_timeout();
        let shared = self.shared.clone();
        let mirror = self.mirror.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs_f32(1.0 / hb_hz));
            loop {
                ticker.tick().await;
                if let Err(e) = shared.send(&MavMessage::HEARTBEAT(companion_heartbeat())) {
                    debug!("fc: companion heartbeat failed: {:#}", e);
                }
                if let Some(age) = shared.heartbeat_age() {
                    if age > timeout && mirror.mark_disconnected() {
                        warn!("fc: no autopilot heartbeat for {:?}, marking disconnected", age);
                    }
                }
            }
        }));
        Ok(())
    }

    async fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<bool> {
        let mut acks = self.acks.resubscribe();
        let [param1, param2, param3, param4, param5, param6, param7] = params;
        let cmd = COMMAND_LONG_DATA {
            target_system: self.shared.target_sys,
            target_component: self.shared.target_comp,
            command,
            confirmation: 0,
            param1,
            param2,
            param3,
            param4,
            param5,
            param6,
            param7,
        };
        self.shared.send(&MavMessage::COMMAND_LONG(cmd))?;

        loop {
            match acks.recv().await {
                Ok(ack) if ack.command == command => match ack.result {
                    MavResult::MAV_RESULT_IN_PROGRESS => continue,
                    MavResult::MAV_RESULT_ACCEPTED => return Ok(true),
                    other => {
                        debug!("fc: {:?} answered {:?}", command, other);
                        return Ok(false);
                    }
                },
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("fc: dropped {} acks while waiting for {:?}", n, command);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(LinkError::ReaderStopped.into()),
            }
        }
    }
}

impl Drop for MavPlane {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        for t in &self.tasks {
            t.abort();
        }
    }
}

impl ControlPlane for MavPlane {
    fn publish_setpoint(&self, sp: &Setpoint) -> Result<()> {
        let (x, y, z, yaw) = enu_to_ned(sp);
        let ignore = PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE;
        let msg = SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: self.shared.boot.elapsed().as_millis() as u32,
            target_system: self.shared.target_sys,
            target_component: self.shared.target_comp,
            coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
            type_mask: ignore,
            x,
            y,
            z,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw,
            yaw_rate: 0.0,
        };
        self.shared.send(&MavMessage::SET_POSITION_TARGET_LOCAL_NED(msg))
    }

    async fn request_mode(&self, mode: &str) -> Result<bool> {
        let (main, sub) = px4_mode::encode(mode)?;
        let base = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        self.command_long(MavCmd::MAV_CMD_DO_SET_MODE, [base, main as f32, sub as f32, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    async fn request_arming(&self, arm: bool) -> Result<bool> {
        let value = if arm { 1.0 } else { 0.0 };
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [value, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }
}

fn read_loop(mut reader: Reader, shared: &Shared, mirror: &TelemetryMirror, acks: broadcast::Sender<COMMAND_ACK_DATA>) {
    while !shared.stop.load(Ordering::Relaxed) {
        match reader.recv() {
            Ok((hdr, msg)) => match msg {
                MavMessage::HEARTBEAT(hb) if hdr.system_id == shared.target_sys => {
                    // GCS and companion heartbeats share the system id; only the autopilot counts.
                    if hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID {
                        continue;
                    }
                    let status = status_from_heartbeat(&hb);
                    if shared.heartbeat_age().is_none() {
                        info!("fc: autopilot heartbeat (mode={}, armed={})", status.mode, status.armed);
                    }
                    shared.touch_heartbeat();
                    mirror.update(status);
                }
                MavMessage::COMMAND_ACK(ack) => {
                    let _ = acks.send(ack);
                }
                _ => {}
            },
            Err(e) if reader.is_fatal(&e) => {
                warn!("fc: link read failed, reader stopping: {}", e);
                break;
            }
            Err(MessageReadError::Io(e)) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                debug!("fc: recv error: {:?}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    debug!("fc: mavlink reader exited");
}

pub fn status_from_heartbeat(hb: &HEARTBEAT_DATA) -> VehicleStatus {
    VehicleStatus {
        connected: true,
        armed: hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
        mode: px4_mode::decode(hb.custom_mode),
    }
}

fn companion_heartbeat() -> HEARTBEAT_DATA {
    HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    }
}

/// ENU setpoint -> NED (x, y, z, yaw) as PX4 expects on the wire.
pub fn enu_to_ned(sp: &Setpoint) -> (f32, f32, f32, f32) {
    let p = sp.position;
    let mut yaw = FRAC_PI_2 - sp.yaw();
    if yaw > PI {
        yaw -= TAU;
    } else if yaw <= -PI {
        yaw += TAU;
    }
    (p.y as f32, p.x as f32, -p.z as f32, yaw as f32)
}

/// ("/dev/ttyACM0", 57600) for "serial:/dev/ttyACM0:57600".
pub fn serial_target(url: &str) -> Option<(&str, u32)> {
    let rest = url.strip_prefix("serial:")?;
    let (dev, baud) = rest.rsplit_once(':')?;
    Some((dev, baud.parse().ok()?))
}
