use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use boardlink_transport::{MessageChannel, TransportError};
use tracing::{debug, info, trace, warn};

use crate::error::{DispatchError, ErrorCode, PropertyError, Result};
use crate::message::{Message, Value};
use crate::subsystem::Subsystem;

/// Timeouts used by [`Dispatcher::serve`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Longest wait for one request. The stop flag is checked between
    /// waits. Default: 500ms.
    pub recv_timeout: Option<Duration>,
    /// Limit on sending one reply. Default: 2s.
    pub send_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Some(Duration::from_millis(500)),
            send_timeout: Some(Duration::from_secs(2)),
        }
    }
}

/// Routes `/subsystem/property` requests to registered subsystems.
#[derive(Default)]
pub struct Dispatcher {
    subsystems: Vec<Box<dyn Subsystem>>,
    config: ServerConfig,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a subsystem. Names must be unique.
    pub fn register(&mut self, subsystem: Box<dyn Subsystem>) -> Result<()> {
        let name = subsystem.name();
        if self.subsystems.iter().any(|s| s.name() == name) {
            return Err(DispatchError::DuplicateSubsystem(name.to_string()));
        }
        debug!(subsystem = name, "subsystem registered");
        self.subsystems.push(subsystem);
        Ok(())
    }

    pub fn subsystem_names(&self) -> impl Iterator<Item = &str> {
        self.subsystems.iter().map(|s| s.name())
    }

    /// Handle one raw request.
    ///
    /// Requests that cannot be parsed are answered on `/error`.
    pub fn handle(&mut self, bytes: &[u8]) -> Option<Message> {
        match Message::parse_bytes(bytes) {
            Ok(request) => self.dispatch(&request),
            Err(err) => {
                debug!(%err, "unparseable request");
                Some(Message::error(None, err.code(), &err.to_string()))
            }
        }
    }

    /// Run one request against its subsystem.
    ///
    /// A request without arguments is a get and is answered with the value.
    /// A request with arguments is a set and is answered only on failure.
    pub fn dispatch(&mut self, request: &Message) -> Option<Message> {
        let Some(sub_name) = request.subsystem() else {
            return Some(Message::error(
                None,
                ErrorCode::NoAddress,
                "message has no subsystem",
            ));
        };

        let Some(subsystem) = self.subsystems.iter_mut().find(|s| s.name() == sub_name) else {
            debug!(subsystem = sub_name, "unknown subsystem");
            return Some(Message::error(
                Some(sub_name),
                ErrorCode::SubsystemNotFound,
                &format!("no subsystem named {sub_name}"),
            ));
        };

        let Some(prop_name) = request.property_name() else {
            return Some(Message::error(
                Some(sub_name),
                ErrorCode::PropertyNotFound,
                "message has no property",
            ));
        };

        let Some(index) = subsystem.properties().iter().position(|p| p.name == prop_name) else {
            debug!(subsystem = sub_name, property = prop_name, "unknown property");
            return Some(Message::error(
                Some(sub_name),
                ErrorCode::PropertyNotFound,
                &format!("{sub_name} has no property {prop_name}"),
            ));
        };

        let outcome = if request.args.is_empty() {
            trace!(subsystem = sub_name, property = prop_name, "get");
            subsystem.get(index).map(Some)
        } else if !subsystem.properties()[index].is_writable() {
            Err(PropertyError::read_only(prop_name))
        } else {
            trace!(subsystem = sub_name, property = prop_name, args = %request.type_tags(), "set");
            subsystem.set(index, &request.args).map(|()| None)
        };

        match outcome {
            Ok(Some(value)) => Some(Message::property(sub_name, prop_name, vec![value])),
            Ok(None) => None,
            Err(err) => {
                debug!(subsystem = sub_name, property = prop_name, code = %err.code, message = %err.message, "request failed");
                Some(Message::error(Some(sub_name), err.code, &err.message))
            }
        }
    }

    /// Answer requests from `channel` until `stop` is set.
    ///
    /// Timeouts and malformed frames are skipped. Any other transport
    /// failure ends the loop and is returned; the channel is left for the
    /// caller to close.
    pub fn serve<C: MessageChannel + ?Sized>(&mut self, channel: &mut C, stop: &AtomicBool) -> Result<()> {
        info!(kind = %channel.kind(), "serving requests");
        while !stop.load(Ordering::Relaxed) {
            let request = match channel.recv_message(self.config.recv_timeout) {
                Ok(request) => request,
                Err(err) if err.is_timeout() => continue,
                Err(TransportError::Frame(err)) => {
                    warn!(%err, "dropping malformed frame");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if let Some(reply) = self.handle(&request) {
                channel.send_message(&reply.to_bytes(), self.config.send_timeout)?;
            }
        }
        debug!("stop requested");
        Ok(())
    }
}

/// Send `request` and wait for its reply.
///
/// An error reply becomes [`DispatchError::Remote`]. Use only for gets, or
/// for sets when the caller expects a failure; a successful set has no reply.
pub fn call<C: MessageChannel + ?Sized>(
    channel: &mut C,
    request: &Message,
    timeout: Option<Duration>,
) -> Result<Message> {
    channel.send_message(&request.to_bytes(), timeout)?;
    let bytes = channel.recv_message(timeout)?;
    let reply = Message::parse_bytes(&bytes)?;
    if let Some((code, message)) = reply.as_error() {
        return Err(DispatchError::Remote {
            code,
            message: message.to_string(),
        });
    }
    Ok(reply)
}

/// Reply value of a get, if it carried exactly one.
pub fn reply_value(reply: &Message) -> Option<&Value> {
    match reply.args.as_slice() {
        [value] => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use boardlink_frame::FrameError;
    use boardlink_transport::{Channel, ChannelKind};
    use bytes::Bytes;

    use super::*;
    use crate::subsystem::{expect_int, expect_str, Property, PropertyResult};

    const PROPS: &[Property] = &[
        Property::read_write("count"),
        Property::read_write("label"),
        Property::read_only("serial"),
    ];

    #[derive(Default)]
    struct Counter {
        count: i32,
        label: String,
    }

    impl Subsystem for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn properties(&self) -> &[Property] {
            PROPS
        }

        fn get(&mut self, index: usize) -> PropertyResult<Value> {
            Ok(match index {
                0 => Value::Int(self.count),
                1 => Value::from(self.label.as_str()),
                _ => Value::from("SN-1"),
            })
        }

        fn set(&mut self, index: usize, args: &[Value]) -> PropertyResult<()> {
            match index {
                0 => self.count = expect_int(args)?,
                1 => self.label = expect_str(args)?.to_string(),
                _ => unreachable!("read-only property reached set"),
            }
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.register(Box::new(Counter::default())).unwrap();
        d
    }

    fn req(text: &str) -> Message {
        text.parse().unwrap()
    }

    #[test]
    fn get_and_set_roundtrip() {
        let mut d = dispatcher();
        assert_eq!(d.dispatch(&req("/counter/count 7")), None);
        assert_eq!(d.dispatch(&req("/counter/count")).unwrap().to_string(), "/counter/count 7");

        assert_eq!(d.dispatch(&req(r#"/counter/label "a b""#)), None);
        assert_eq!(
            d.dispatch(&req("/counter/label")).unwrap().to_string(),
            r#"/counter/label "a b""#
        );
    }

    #[test]
    fn unknown_subsystem_is_named_in_reply() {
        let mut d = dispatcher();
        let reply = d.dispatch(&req("/doesNotExist/foo")).unwrap();
        assert_eq!(reply.address, "/doesNotExist/error");
        let (code, text) = reply.as_error().unwrap();
        assert_eq!(code, ErrorCode::SubsystemNotFound);
        assert!(text.contains("doesNotExist"));
    }

    #[test]
    fn unknown_or_missing_property() {
        let mut d = dispatcher();
        let reply = d.dispatch(&req("/counter/nope 1")).unwrap();
        assert_eq!(reply.as_error().unwrap().0, ErrorCode::PropertyNotFound);

        let reply = d.dispatch(&req("/counter")).unwrap();
        assert_eq!(reply.address, "/counter/error");
        assert_eq!(reply.as_error().unwrap().0, ErrorCode::PropertyNotFound);
    }

    #[test]
    fn read_only_set_is_rejected_before_subsystem() {
        let mut d = dispatcher();
        let reply = d.dispatch(&req("/counter/serial \"x\"")).unwrap();
        assert_eq!(
            reply.as_error(),
            Some((ErrorCode::ReadOnly, "serial is read only"))
        );
        assert_eq!(d.dispatch(&req("/counter/serial")).unwrap().args, vec![Value::from("SN-1")]);
    }

    #[test]
    fn wrong_argument_type_or_count() {
        let mut d = dispatcher();
        for text in ["/counter/count \"7\"", "/counter/count 1 2", "/counter/label 3"] {
            let reply = d.dispatch(&req(text)).unwrap();
            assert_eq!(reply.as_error().unwrap().0, ErrorCode::BadData, "{text}");
        }
        assert_eq!(d.dispatch(&req("/counter/count")).unwrap().args, vec![Value::Int(0)]);
    }

    #[test]
    fn malformed_requests_are_answered_on_bare_error() {
        let mut d = dispatcher();
        let reply = d.handle(b"counter/count").unwrap();
        assert_eq!(reply.address, "/error");
        assert_eq!(reply.as_error().unwrap().0, ErrorCode::NoAddress);

        let reply = d.handle(b"/counter/label \"open").unwrap();
        assert_eq!(reply.as_error().unwrap().0, ErrorCode::BadFormat);

        let reply = d.handle(b"/").unwrap();
        assert_eq!(reply.as_error().unwrap().0, ErrorCode::NoAddress);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut d = dispatcher();
        let err = d.register(Box::new(Counter::default())).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateSubsystem(name) if name == "counter"));
        assert_eq!(d.subsystem_names().collect::<Vec<_>>(), ["counter"]);
    }

    enum Inbound {
        Message(&'static [u8]),
        Fault(TransportError),
    }

    /// In-memory channel fed from a script; running out of script stops the
    /// server through `stop`.
    struct ScriptChannel {
        inbound: VecDeque<Inbound>,
        sent: Arc<Mutex<Vec<String>>>,
        stop: Arc<AtomicBool>,
    }

    impl Channel for ScriptChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Stream
        }

        fn is_open(&self) -> bool {
            true
        }

        fn read(&mut self, _buf: &mut [u8], _timeout: Option<Duration>) -> boardlink_transport::Result<usize> {
            Ok(0)
        }

        fn write(&mut self, buf: &[u8], _timeout: Option<Duration>) -> boardlink_transport::Result<usize> {
            Ok(buf.len())
        }

        fn close(&mut self) {}
    }

    impl MessageChannel for ScriptChannel {
        fn recv_message(&mut self, timeout: Option<Duration>) -> boardlink_transport::Result<Bytes> {
            match self.inbound.pop_front() {
                Some(Inbound::Message(bytes)) => Ok(Bytes::from_static(bytes)),
                Some(Inbound::Fault(err)) => Err(err),
                None => {
                    self.stop.store(true, Ordering::Relaxed);
                    Err(TransportError::Timeout(timeout.unwrap_or_default()))
                }
            }
        }

        fn send_message(&mut self, message: &[u8], _timeout: Option<Duration>) -> boardlink_transport::Result<usize> {
            self.sent
                .lock()
                .unwrap()
                .push(String::from_utf8(message.to_vec()).unwrap());
            Ok(message.len())
        }
    }

    fn script(inbound: Vec<Inbound>) -> (ScriptChannel, Arc<Mutex<Vec<String>>>, Arc<AtomicBool>) {
        let stop = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel = ScriptChannel {
            inbound: inbound.into(),
            sent: Arc::clone(&sent),
            stop: Arc::clone(&stop),
        };
        (channel, sent, stop)
    }

    #[test]
    fn serve_skips_timeouts_and_bad_frames() {
        let (mut channel, sent, stop) = script(vec![
            Inbound::Message(b"/counter/count 3"),
            Inbound::Fault(TransportError::Timeout(Duration::from_millis(1))),
            Inbound::Fault(TransportError::Frame(FrameError::FrameTooLong { max: 8 })),
            Inbound::Message(b"/counter/count"),
            Inbound::Message(b"/nope/x"),
        ]);

        dispatcher().serve(&mut channel, &stop).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], "/counter/count 3");
        assert!(sent[1].starts_with("/nope/error 3 "));
    }

    #[test]
    fn serve_returns_on_closed_channel() {
        let (mut channel, sent, stop) = script(vec![
            Inbound::Message(b"/counter/count"),
            Inbound::Fault(TransportError::Closed),
            Inbound::Message(b"/counter/count"),
        ]);

        let err = dispatcher().serve(&mut channel, &stop).unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::Closed)));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn serve_honours_preset_stop() {
        let (mut channel, sent, stop) = script(vec![Inbound::Message(b"/counter/count")]);
        stop.store(true, Ordering::Relaxed);
        dispatcher().serve(&mut channel, &stop).unwrap();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn reply_value_needs_exactly_one_arg() {
        assert_eq!(reply_value(&req("/a/b 1")), Some(&Value::Int(1)));
        assert_eq!(reply_value(&req("/a/b")), None);
        assert_eq!(reply_value(&req("/a/b 1 2")), None);
    }
}
