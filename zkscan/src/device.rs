//! High-level device interface

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use zkscan_core::auth;
use zkscan_core::codec::{Reader, Writer};
use zkscan_core::command::{reply, Command};
use zkscan_core::constants::{events, fct, MAX_TCP_CHUNK, MAX_UDP_CHUNK};
use zkscan_core::frame::Response;
use zkscan_core::{records, time, DEFAULT_PORT};
use zkscan_transport::{TcpTransport, Transport, UdpTransport};
use zkscan_types::{Attendance, DeviceProperties, ScanEvent};

use crate::capture::{self, CaptureConfig, CaptureHandle};
use crate::engine::Engine;
use crate::error::{Error, Result};

/// Default keep-alive period for the capture loop's read deadline.
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(20);

/// A session with one ZK device.
///
/// Construct with [`Device::new`] (TCP) or [`Device::new_udp`], adjust with
/// the builder methods, then [`connect`](Device::connect). One command is in
/// flight at a time; while capturing, the loop owns the socket and every
/// command fails with [`Error::CannotCommandWhileCapturing`].
pub struct Device {
    host: String,
    port: u16,
    pin: u32,
    tz: FixedOffset,
    tcp: bool,
    device_id: String,
    keepalive: Duration,
    max_chunk: Option<usize>,
    engine: Option<Engine>,
    disabled: bool,
    capture: Option<CaptureHandle>,
}

impl Device {
    /// New device session over TCP (port 4370).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            pin: 0,
            tz: Utc.fix(),
            tcp: true,
            device_id: String::new(),
            keepalive: DEFAULT_KEEPALIVE,
            max_chunk: None,
            engine: None,
            disabled: false,
            capture: None,
        }
    }

    /// New device session over UDP.
    pub fn new_udp(host: impl Into<String>) -> Self {
        let mut device = Self::new(host);
        device.tcp = false;
        device
    }

    /// Set device port (default 4370)
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the communication pin used when the device demands auth
    pub fn with_pin(mut self, pin: u32) -> Self {
        self.pin = pin;
        self
    }

    /// Set the timezone device times are interpreted in (default UTC)
    pub fn with_timezone(mut self, tz: FixedOffset) -> Self {
        self.tz = tz;
        self
    }

    /// Tag copied into every emitted [`ScanEvent`]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Set the capture loop's keep-alive period (default 20 s)
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Override the buffered-read chunk size
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk);
        self
    }

    /// Whether a session is established.
    pub fn is_connected(&self) -> bool {
        self.engine.is_some() || self.capture.is_some()
    }

    /// Whether the capture loop is running.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Open the socket and establish a session.
    ///
    /// The session id comes from the CMD_CONNECT reply. A device with a
    /// communication pin answers ACK_UNAUTH and gets the scrambled key; a
    /// rejected key fails with [`Error::Unauthorized`].
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let mut transport: Box<dyn Transport> = if self.tcp {
            Box::new(TcpTransport::new(self.host.clone(), self.port))
        } else {
            Box::new(UdpTransport::new(self.host.clone(), self.port))
        };
        transport.connect().await?;

        self.connect_with(transport).await
    }

    pub(crate) async fn connect_with(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        let max_chunk = self
            .max_chunk
            .unwrap_or(if self.tcp { MAX_TCP_CHUNK } else { MAX_UDP_CHUNK });
        let mut engine = Engine::new(transport, self.tcp, max_chunk);

        let res = match engine.send_command(Command::Connect, &[], 8).await {
            Ok(res) => res,
            Err(err) => {
                engine.shutdown().await;
                return Err(err);
            }
        };

        engine.set_session_id(res.command_id);

        if res.code == reply::ACK_UNAUTH {
            debug!("device requires authentication");
            let key = auth::make_commkey(self.pin, engine.session_id(), 50);

            match engine.send_command(Command::Auth, &key, 8).await {
                Ok(auth_res) if auth_res.status => {}
                Ok(_) => {
                    engine.shutdown().await;
                    return Err(Error::Unauthorized);
                }
                Err(err) => {
                    engine.shutdown().await;
                    return Err(err);
                }
            }
        }

        info!(session_id = engine.session_id(), "connected");
        self.engine = Some(engine);
        self.disabled = false;
        Ok(())
    }

    /// Send CMD_EXIT (best effort) and close the socket.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.capture.is_some() {
            self.stop_capturing().await;
        }

        let Some(mut engine) = self.engine.take() else {
            return Err(Error::AlreadyDisconnected);
        };

        let _ = engine.send_command(Command::Exit, &[], 8).await;
        engine.shutdown().await;
        self.disabled = false;

        info!("disconnected");
        Ok(())
    }

    /// Return the device to normal operation.
    pub async fn enable_device(&mut self) -> Result<()> {
        self.command_ok(Command::EnableDevice, &[], 8).await?;
        self.disabled = false;
        Ok(())
    }

    /// Lock the device UI ("Working...") during maintenance.
    pub async fn disable_device(&mut self) -> Result<()> {
        self.command_ok(Command::DisableDevice, &[], 8).await?;
        self.disabled = true;
        Ok(())
    }

    /// Firmware version string.
    pub async fn get_firmware_version(&mut self) -> Result<String> {
        let res = self.command_ok(Command::GetVersion, &[], 1024).await?;

        let end = res.body.iter().position(|&b| b == 0).unwrap_or(res.body.len());
        Ok(String::from_utf8_lossy(&res.body[..end]).into_owned())
    }

    /// Device clock, in the session timezone.
    pub async fn get_time(&mut self) -> Result<DateTime<FixedOffset>> {
        let res = self.command_ok(Command::GetTime, &[], 1024).await?;

        let mut r = Reader::new(&res.body);
        Ok(time::decode_packed(r.u32()?, &self.tz)?)
    }

    /// Set the device clock.
    pub async fn set_time(&mut self, t: &DateTime<FixedOffset>) -> Result<()> {
        let mut body = Writer::with_capacity(4);
        body.u32(time::encode_packed(t));

        self.command_ok(Command::SetTime, &body.finish(), 8).await?;
        Ok(())
    }

    /// Release the door relay for `seconds`.
    pub async fn unlock_door(&mut self, seconds: u32) -> Result<()> {
        // The wire unit is tenths of a second
        let mut body = Writer::with_capacity(4);
        body.u32(seconds.saturating_mul(10));

        self.command_ok(Command::Unlock, &body.finish(), 8).await?;
        Ok(())
    }

    /// Show `text` on the device LCD, truncated to 32 characters.
    pub async fn write_lcd(&mut self, text: &str) -> Result<()> {
        let truncated: String = text.chars().take(32).collect();

        let mut body = Writer::with_capacity(4 + truncated.len());
        body.i16(1).i8(0).bytes(b" ").bytes(truncated.as_bytes());

        self.command_ok(Command::WriteLcd, &body.finish(), 8).await?;
        Ok(())
    }

    /// Aggregate firmware version, clock and storage counters.
    pub async fn get_properties(&mut self) -> Result<DeviceProperties> {
        let firmware_version = self.get_firmware_version().await?;
        let clock = self.get_time().await?;

        let res = self.command_ok(Command::GetFreeSizes, &[], 1024).await?;
        let sizes = records::parse_free_sizes(&res.body)?;

        Ok(DeviceProperties {
            device_id: self.device_id.clone(),
            tcp: self.tcp,
            firmware_version,
            clock,
            total_users: sizes.total_users,
            total_fingers: sizes.total_fingers,
            total_records: sizes.total_records,
            finger_cap: sizes.finger_cap,
            user_cap: sizes.user_cap,
            record_cap: sizes.record_cap,
        })
    }

    /// Download the attendance log.
    ///
    /// Firmware families storing 8- or 16-byte records are refused; only
    /// the 40-byte layout is understood.
    pub async fn get_all_scanned_events(&mut self) -> Result<Vec<Attendance>> {
        self.read_user_templates().await?;
        let record_count = self.read_size().await?;

        let tz = self.tz;
        let data = self
            .engine_mut()?
            .read_with_buffer(Command::AttLogRrq, 0, 0)
            .await?;

        if data.len() < 4 {
            return Ok(Vec::new());
        }

        let mut r = Reader::new(&data);
        let total_size = r.u32()? as usize;
        let data = &data[4..];

        if record_count > 0 {
            let record_size = total_size / record_count;
            if record_size == 8 || record_size == 16 {
                return Err(Error::UnsupportedRecordLayout(record_size));
            }
        }

        Ok(records::parse_attendance_log(data, &tz)?)
    }

    /// Begin streaming live scan events into `sink`.
    ///
    /// The loop owns the socket until [`stop_capturing`](Device::stop_capturing);
    /// the sink is dropped when the loop exits, closing the receiver.
    pub async fn start_capturing(&mut self, sink: mpsc::Sender<ScanEvent>) -> Result<()> {
        if self.capture.is_some() {
            return Err(Error::AlreadyCapturing);
        }
        if self.engine.is_none() {
            return Err(Error::NotConnected);
        }

        self.read_user_templates().await?;

        if self.disabled {
            self.enable_device().await?;
        }

        self.command_ok(Command::StartVerify, &[], 8).await?;

        let mut body = Writer::with_capacity(4);
        body.u32(events::EF_ATTLOG);
        self.command_ok(Command::RegEvent, &body.finish(), 8).await?;

        let engine = self.engine.take().ok_or(Error::NotConnected)?;
        let config = CaptureConfig {
            device_id: self.device_id.clone(),
            tz: self.tz,
            keepalive: self.keepalive,
        };

        self.capture = Some(capture::spawn(engine, sink, config));
        info!("capture started");
        Ok(())
    }

    /// Stop the capture loop and reclaim the socket. Idempotent.
    pub async fn stop_capturing(&mut self) {
        let Some(handle) = self.capture.take() else {
            return;
        };

        let _ = handle.stop.send(true);
        match handle.task.await {
            Ok(engine) => self.engine = Some(engine),
            Err(err) => warn!("capture task failed: {err}"),
        }

        info!("capture stopped");
    }

    fn engine_mut(&mut self) -> Result<&mut Engine> {
        if self.capture.is_some() {
            return Err(Error::CannotCommandWhileCapturing);
        }
        self.engine.as_mut().ok_or(Error::NotConnected)
    }

    async fn command_ok(&mut self, command: Command, body: &[u8], budget: usize) -> Result<Response> {
        let res = self.engine_mut()?.send_command(command, body, budget).await?;
        if !res.status {
            return Err(Error::Rejected {
                command,
                code: res.code,
            });
        }
        Ok(res)
    }

    /// Record count from the free-sizes reply; devices answering with a
    /// short body count as zero.
    async fn read_size(&mut self) -> Result<usize> {
        let res = self
            .engine_mut()?
            .send_command(Command::GetFreeSizes, &[], 1024)
            .await?;

        Ok(records::parse_free_sizes(&res.body)
            .map(|sizes| sizes.total_records.max(0) as usize)
            .unwrap_or(0))
    }

    /// Warm-up download of the user/template table before log reads and
    /// capture, matching the device's expected command sequence. The
    /// payload is opaque and discarded.
    async fn read_user_templates(&mut self) -> Result<()> {
        self.read_size().await?;
        self.engine_mut()?
            .read_with_buffer(Command::UserTempRrq, fct::FCT_USER, 0)
            .await?;
        Ok(())
    }
}
