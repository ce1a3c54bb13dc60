use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{Deserializer, Value};
use tracing::{debug, info, warn};

use super::parse_time;
use crate::app::host::PlayerObserver;

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Reads the host's JSON-RPC notification socket and feeds the callbacks to
/// a [`PlayerObserver`].
pub struct KodiEventListener {
    addr: String,
    abort: Arc<AtomicBool>,
}

impl KodiEventListener {
    pub fn new(addr: &str, abort: Arc<AtomicBool>) -> Self {
        Self {
            addr: addr.to_string(),
            abort,
        }
    }

    /// Blocks until the abort flag is set, reconnecting when the socket
    /// drops.
    pub fn run(&self, observer: &mut dyn PlayerObserver) {
        while !self.abort.load(Ordering::SeqCst) {
            match TcpStream::connect(&self.addr) {
                Ok(stream) => {
                    info!(addr = %self.addr, "connected to host notifications");
                    if let Err(err) = self.listen(stream, observer) {
                        warn!(addr = %self.addr, error = %err, "notification stream closed");
                    }
                }
                Err(err) => {
                    debug!(addr = %self.addr, error = %err, "host not reachable, retrying");
                }
            }
            self.sleep_unless_aborted(RECONNECT_DELAY);
        }
    }

    fn sleep_unless_aborted(&self, total: Duration) {
        let step = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < total && !self.abort.load(Ordering::SeqCst) {
            thread::sleep(step);
            waited += step;
        }
    }

    fn listen(&self, mut stream: TcpStream, observer: &mut dyn PlayerObserver) -> std::io::Result<()> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut framer = MessageFramer::default();
        let mut chunk = [0u8; 8192];
        while !self.abort.load(Ordering::SeqCst) {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(read) => {
                    for message in framer.push(&chunk[..read]) {
                        deliver(&message, observer);
                    }
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Splits the byte stream into complete JSON values; the socket carries
/// concatenated objects with no delimiter.
#[derive(Default)]
pub(crate) struct MessageFramer {
    buf: Vec<u8>,
}

impl MessageFramer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        let consumed = {
            let mut stream = Deserializer::from_slice(&self.buf).into_iter::<Value>();
            loop {
                match stream.next() {
                    Some(Ok(value)) => out.push(value),
                    Some(Err(err)) if err.is_eof() => break Some(stream.byte_offset()),
                    Some(Err(err)) => {
                        warn!(error = %err, "discarding unreadable notification data");
                        break None;
                    }
                    None => break Some(stream.byte_offset()),
                }
            }
        };
        match consumed {
            Some(consumed) => {
                self.buf.drain(..consumed);
            }
            None => self.buf.clear(),
        }
        out
    }
}

/// Maps one notification onto the observer callbacks.
pub(crate) fn deliver(message: &Value, observer: &mut dyn PlayerObserver) {
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return;
    };
    let params = message.get("params");
    let sender = params
        .and_then(|params| params.get("sender"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let null = Value::Null;
    let data = params
        .and_then(|params| params.get("data"))
        .unwrap_or(&null);
    let player = data.get("player");
    debug!(method, sender, "host notification");

    match method {
        "Player.OnPlay" => observer.on_playback_started(),
        "Player.OnPause" => observer.on_playback_paused(),
        "Player.OnResume" => observer.on_playback_resumed(),
        "Player.OnStop" => {
            if data.get("end").and_then(Value::as_bool).unwrap_or(false) {
                observer.on_playback_ended();
            } else {
                observer.on_playback_stopped();
            }
        }
        "Player.OnSeek" => {
            let time = player
                .and_then(|player| player.get("time"))
                .map(parse_time)
                .unwrap_or(0.0);
            let offset = player
                .and_then(|player| player.get("seekoffset"))
                .map(parse_time)
                .unwrap_or(0.0);
            observer.on_playback_seek(time, offset);
        }
        "Player.OnSpeedChanged" => {
            let speed = player
                .and_then(|player| player.get("speed"))
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            observer.on_playback_speed_changed(speed);
        }
        "VideoLibrary.OnScanStarted" => observer.on_database_scan_started("video"),
        "VideoLibrary.OnScanFinished" => observer.on_database_updated("video"),
        "AudioLibrary.OnScanStarted" => observer.on_database_scan_started("music"),
        "AudioLibrary.OnScanFinished" => observer.on_database_updated("music"),
        _ => observer.on_notification(sender, method, data),
    }
}
