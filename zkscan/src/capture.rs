//! Live event capture loop
//!
//! A spawned task owns the engine (and with it the socket) for the life of
//! the capture. Inbound event frames are acknowledged and decoded into
//! [`ScanEvent`]s pushed over a bounded channel; an expired read deadline
//! triggers a liveness probe instead of an error. The engine is handed back
//! to the session when the loop exits.

use std::time::Duration;

use chrono::FixedOffset;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use zkscan_core::codec::Writer;
use zkscan_core::command::{reply, Command};
use zkscan_core::constants::EVENT_READ_SIZE;
use zkscan_core::{records, HEADER_SIZE, TCP_TOP_SIZE};
use zkscan_types::{ScanEvent, ScanEventError};

use crate::engine::Engine;

pub(crate) struct CaptureHandle {
    pub(crate) stop: watch::Sender<bool>,
    pub(crate) task: JoinHandle<Engine>,
}

pub(crate) struct CaptureConfig {
    pub(crate) device_id: String,
    pub(crate) tz: FixedOffset,
    pub(crate) keepalive: Duration,
}

pub(crate) fn spawn(
    engine: Engine,
    sink: mpsc::Sender<ScanEvent>,
    config: CaptureConfig,
) -> CaptureHandle {
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run(engine, sink, config, stop_rx));
    CaptureHandle { stop, task }
}

async fn run(
    mut engine: Engine,
    sink: mpsc::Sender<ScanEvent>,
    config: CaptureConfig,
    mut stop: watch::Receiver<bool>,
) -> Engine {
    debug!(device_id = %config.device_id, "capture loop running");

    loop {
        let read = tokio::select! {
            _ = stop.changed() => {
                deregister_events(&mut engine).await;
                break;
            }
            read = engine.recv_event(EVENT_READ_SIZE, config.keepalive) => read,
        };

        match read {
            Ok(packet) => {
                if engine.ack_event().await.is_err() {
                    let _ = sink
                        .send(transport_event(&config, "failed to acknowledge event"))
                        .await;
                    break;
                }

                if !forward_events(engine.is_tcp(), &packet, &config, &sink).await {
                    break;
                }
            }
            Err(err) if err.is_timeout() => {
                // Quiet period; make sure the socket is still alive.
                match engine.send_command(Command::GetVersion, &[], 1024).await {
                    Ok(_) => trace!("keep-alive probe ok"),
                    Err(probe_err) => {
                        let _ = sink
                            .send(transport_event(&config, &probe_err.to_string()))
                            .await;
                        break;
                    }
                }
            }
            Err(err) => {
                let _ = sink.send(transport_event(&config, &err.to_string())).await;
                break;
            }
        }
    }

    debug!(device_id = %config.device_id, "capture loop exited");
    engine
}

/// CMD_REG_EVENT(0), best effort: the device may already be gone.
async fn deregister_events(engine: &mut Engine) {
    let mut body = Writer::with_capacity(4);
    body.u32(0);
    let _ = engine.send_command(Command::RegEvent, &body.finish(), 8).await;
}

fn transport_event(config: &CaptureConfig, message: &str) -> ScanEvent {
    ScanEvent::failed(
        config.device_id.clone(),
        ScanEventError::Transport(message.into()),
    )
}

/// Decode one inbound packet and push its records. Returns false when the
/// receiver is gone and the loop should stop.
async fn forward_events(
    tcp: bool,
    packet: &[u8],
    config: &CaptureConfig,
    sink: &mpsc::Sender<ScanEvent>,
) -> bool {
    let header_at = if tcp { TCP_TOP_SIZE } else { 0 };

    if packet.len() < header_at + HEADER_SIZE {
        let event = ScanEvent::failed(
            config.device_id.clone(),
            ScanEventError::Decode(format!("event frame of {} bytes", packet.len())),
        );
        return sink.send(event).await.is_ok();
    }

    let command = u16::from_le_bytes([packet[header_at], packet[header_at + 1]]);
    if command != reply::REG_EVENT {
        debug!(command, "skipping non-event frame");
        return true;
    }

    let payload = &packet[header_at + HEADER_SIZE..];
    for record in records::parse_live_records(payload, &config.tz) {
        let event = match record {
            Ok(record) => {
                ScanEvent::new(config.device_id.clone(), record.user_id, record.timestamp)
            }
            Err(err) => ScanEvent::failed(
                config.device_id.clone(),
                ScanEventError::Decode(err.to_string()),
            ),
        };

        if sink.send(event).await.is_err() {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::error::Error;
    use crate::testutil::{data_frame, device_frame, ok_frame, MockTransport, Step};
    use pretty_assertions::assert_eq;

    fn wrap(frame: Vec<u8>) -> Vec<u8> {
        zkscan_core::frame::wrap_tcp(&frame).to_vec()
    }

    fn free_sizes_body() -> Vec<u8> {
        let mut body = Vec::new();
        for i in 0..20i32 {
            body.extend_from_slice(&i.to_le_bytes());
        }
        body
    }

    /// Steps covering connect + the capture preamble (template warm-up,
    /// STARTVERIFY, REG_EVENT).
    fn preamble() -> Vec<Step> {
        vec![
            Step::Recv(wrap(ok_frame(7, 0))),
            Step::Recv(wrap(device_frame(reply::ACK_OK, 7, 1, &free_sizes_body()))),
            Step::Recv(wrap(data_frame(&[]))),
            Step::Recv(wrap(ok_frame(7, 3))),
            Step::Recv(wrap(ok_frame(7, 4))),
        ]
    }

    fn event_packet(user_id: &str) -> Vec<u8> {
        let mut record = vec![0u8; 32];
        record[..user_id.len()].copy_from_slice(user_id.as_bytes());
        record[26..32].copy_from_slice(&[24, 3, 9, 8, 15, 0]);
        wrap(device_frame(reply::REG_EVENT, 7, 0, &record))
    }

    #[tokio::test]
    async fn test_capture_emits_events_and_acks() {
        let mut steps = preamble();
        steps.push(Step::Recv(event_packet("41")));
        steps.push(Step::Pending);

        let (transport, sent) = MockTransport::scripted(steps);
        let mut device = Device::new("device.test").with_device_id("gate");
        device.connect_with(Box::new(transport)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        device.start_capturing(tx).await.unwrap();

        let event = rx.recv().await.expect("one scan event");
        assert_eq!(event.device_id, "gate");
        assert_eq!(event.user_id, 41);
        assert!(event.error.is_none());

        device.stop_capturing().await;
        assert!(rx.recv().await.is_none(), "sink closed after stop");

        // Preamble (5 exchanges) + ACK_OK for the event + REG_EVENT(0)
        let log = sent.lock().unwrap();
        let ack = &log[5];
        assert_eq!(
            u16::from_le_bytes([ack[8], ack[9]]),
            u16::from(Command::AckOk)
        );
        let dereg = log.last().unwrap();
        assert_eq!(
            u16::from_le_bytes([dereg[8], dereg[9]]),
            u16::from(Command::RegEvent)
        );
        assert_eq!(&dereg[16..20], &[0, 0, 0, 0]);
    }

    // S6: an expired keep-alive deadline triggers a GET_VERSION probe; a
    // healthy reply resumes listening with zero events emitted.
    #[tokio::test]
    async fn test_capture_timeout_probes_and_resumes() {
        let mut steps = preamble();
        steps.push(Step::Timeout);
        steps.push(Step::Recv(wrap(device_frame(
            reply::ACK_OK,
            7,
            5,
            b"Ver 6.60",
        ))));
        steps.push(Step::Pending);

        let (transport, sent) = MockTransport::scripted(steps);
        let mut device = Device::new("device.test");
        device.connect_with(Box::new(transport)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        device.start_capturing(tx).await.unwrap();

        device.stop_capturing().await;
        assert!(rx.recv().await.is_none(), "no events during a quiet probe");

        let log = sent.lock().unwrap();
        let probe = &log[5];
        assert_eq!(
            u16::from_le_bytes([probe[8], probe[9]]),
            u16::from(Command::GetVersion)
        );
    }

    #[tokio::test]
    async fn test_capture_socket_error_is_terminal() {
        let steps = preamble();
        // Script exhaustion: the event read hits ConnectionClosed

        let (transport, _sent) = MockTransport::scripted(steps);
        let mut device = Device::new("device.test").with_device_id("gate");
        device.connect_with(Box::new(transport)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        device.start_capturing(tx).await.unwrap();

        let event = rx.recv().await.expect("terminal event");
        let error = event.error.expect("carries the transport error");
        assert!(error.is_terminal());

        assert!(rx.recv().await.is_none(), "loop exited");
        device.stop_capturing().await;
    }

    // Property 6: the engine refuses commands while the loop owns the
    // socket.
    #[tokio::test]
    async fn test_commands_refused_while_capturing() {
        let mut steps = preamble();
        steps.push(Step::Pending);

        let (transport, _sent) = MockTransport::scripted(steps);
        let mut device = Device::new("device.test");
        device.connect_with(Box::new(transport)).await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        device.start_capturing(tx).await.unwrap();

        let err = device.get_firmware_version().await.unwrap_err();
        assert!(matches!(err, Error::CannotCommandWhileCapturing));

        let (tx2, _rx2) = mpsc::channel(8);
        let err = device.start_capturing(tx2).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyCapturing));

        device.stop_capturing().await;
        // Idempotent
        device.stop_capturing().await;
    }

    #[tokio::test]
    async fn test_capture_skips_foreign_frames() {
        let mut steps = preamble();
        // A stray ACK_OK frame is acknowledged but produces no event
        steps.push(Step::Recv(wrap(ok_frame(7, 9))));
        steps.push(Step::Recv(event_packet("8")));
        steps.push(Step::Pending);

        let (transport, _sent) = MockTransport::scripted(steps);
        let mut device = Device::new("device.test");
        device.connect_with(Box::new(transport)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        device.start_capturing(tx).await.unwrap();

        let event = rx.recv().await.expect("event after the stray frame");
        assert_eq!(event.user_id, 8);

        device.stop_capturing().await;
    }

    #[tokio::test]
    async fn test_capture_decode_error_is_not_terminal() {
        let mut steps = preamble();
        // Unrecognized 20-byte record, then a good one
        steps.push(Step::Recv(wrap(device_frame(
            reply::REG_EVENT,
            7,
            0,
            &[0u8; 20],
        ))));
        steps.push(Step::Recv(event_packet("12")));
        steps.push(Step::Pending);

        let (transport, _sent) = MockTransport::scripted(steps);
        let mut device = Device::new("device.test");
        device.connect_with(Box::new(transport)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        device.start_capturing(tx).await.unwrap();

        let bad = rx.recv().await.expect("decode failure event");
        assert!(matches!(bad.error, Some(ScanEventError::Decode(_))));

        let good = rx.recv().await.expect("loop kept running");
        assert_eq!(good.user_id, 12);

        device.stop_capturing().await;
    }
}
