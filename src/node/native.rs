//! NodeRuntime backed by the LND shared library
//!
//! Every call hands the library a callback struct whose context pointers
//! carry the Rust side of the reply:
//! - unary calls leak a boxed oneshot sender, reclaimed by whichever
//!   callback the library fires
//! - server streams leak an `Arc<StreamSink>` that lives for the rest of the
//!   process, since the library offers no way to close a server stream
//! - bidirectional streams do the same, but cancelling their handle calls
//!   `StopStreamC` so the node closes its side

use async_trait::async_trait;
use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::config::ConfigBlob;
use super::ffi::{self, CCallback, CRecvStream, NodeLibrary, SendStreamFn, StopStreamFn};
use super::runtime::{NodeRuntime, Payload, RuntimeError, START};
use super::subscription::{BidiStream, StreamSink, Subscription};

/// Default time to wait for a unary answer
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Reply = Result<Vec<u8>, String>;
type ReplySender = oneshot::Sender<Reply>;

/// Runtime that forwards calls into the loaded library
pub struct NativeRuntime {
    library: NodeLibrary,
    call_timeout: Duration,
}

impl NativeRuntime {
    /// Load the library at `path`
    pub fn load(path: &Path, call_timeout: Duration) -> Result<Self, RuntimeError> {
        let library = NodeLibrary::open(path)?;
        Ok(Self {
            library,
            call_timeout,
        })
    }

    pub fn library_path(&self) -> &Path {
        self.library.path()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    fn invoke_start(&self, config: &CString) -> Result<oneshot::Receiver<Reply>, RuntimeError> {
        let start = self.library.start_fn()?;
        let (callback, rx) = reply_callback();
        unsafe { start(config.as_ptr() as *mut c_char, callback) };
        Ok(rx)
    }

    fn invoke_unary(
        &self,
        method: &str,
        request: &[u8],
    ) -> Result<oneshot::Receiver<Reply>, RuntimeError> {
        let function = self.library.unary_fn(method)?;
        let (mut buffer, length) = request_buffer(method, request)?;
        let (callback, rx) = reply_callback();
        unsafe { function(buffer.as_mut_ptr() as *mut c_char, length, callback) };
        Ok(rx)
    }
}

#[async_trait]
impl NodeRuntime for NativeRuntime {
    async fn start(&self, config: &ConfigBlob) -> Result<Payload, RuntimeError> {
        let text = CString::new(config.to_text()).map_err(|_| RuntimeError::InvalidArgument {
            method: START.to_string(),
            reason: "configuration contains a NUL byte".to_string(),
        })?;

        log::debug!("Calling {} with {} flags", START, config.len());
        let rx = self.invoke_start(&text)?;
        // Startup may take a long time (wallet unlock, chain sync), no timeout here.
        let reply = rx
            .await
            .map_err(|_| RuntimeError::Dropped(START.to_string()))?;
        drop(text);
        reply.map(Payload::new).map_err(RuntimeError::Runtime)
    }

    async fn call(&self, method: &str, request: &[u8]) -> Result<Payload, RuntimeError> {
        let rx = self.invoke_unary(method, request)?;
        await_reply(method, rx, self.call_timeout).await
    }

    fn subscribe(&self, method: &str, request: &[u8]) -> Result<Subscription, RuntimeError> {
        let function = self.library.stream_fn(method)?;
        let (mut buffer, length) = request_buffer(method, request)?;

        let (sink, subscription) = Subscription::channel(method);
        let context = Arc::into_raw(Arc::new(sink)) as *mut c_void;
        let stream = CRecvStream {
            on_response: Some(stream_response),
            on_error: Some(stream_error),
            response_context: context,
            error_context: context,
        };

        unsafe { function(buffer.as_mut_ptr() as *mut c_char, length, stream) };

        let name = method.to_string();
        Ok(subscription.on_cancel(move || {
            log::debug!("{} cancelled locally, node side stream stays open", name);
        }))
    }

    fn open_bidi_stream(&self, method: &str) -> Result<BidiStream, RuntimeError> {
        let function = self.library.bi_stream_fn(method)?;
        let send = self.library.send_stream_fn()?;
        let stop = self.library.stop_stream_fn()?;

        let (sink, subscription) = Subscription::channel(method);
        let context = Arc::into_raw(Arc::new(sink)) as *mut c_void;
        let stream = CRecvStream {
            on_response: Some(stream_response),
            on_error: Some(stream_error),
            response_context: context,
            error_context: context,
        };

        let id = unsafe { function(stream) };
        if id == 0 {
            // No stream was created, so no callback holds the context
            unsafe { drop(Arc::from_raw(context as *const StreamSink)) };
            return Err(RuntimeError::Runtime(format!("{} did not open a stream", method)));
        }
        log::debug!("{} stream {} opened", method, id);

        let subscription = subscription.on_cancel(stop_stream(method, id, stop));
        Ok(BidiStream::new(subscription, stream_writer(method, id, send)))
    }
}

/// Cleanup that closes a bidirectional stream on the node side
fn stop_stream(method: &str, id: usize, stop: StopStreamFn) -> impl FnOnce() + Send + 'static {
    let name = method.to_string();
    move || {
        let code = unsafe { stop(id) };
        if code == 0 {
            log::debug!("{} stream {} stopped", name, id);
        } else {
            log::warn!("Failed to stop {} stream {}: error code {}", name, id, code);
        }
    }
}

/// Writer for the send half of a bidirectional stream
fn stream_writer(
    method: &str,
    id: usize,
    send: SendStreamFn,
) -> impl Fn(&[u8]) -> Result<(), RuntimeError> + Send + Sync + 'static {
    let name = method.to_string();
    move |bytes: &[u8]| {
        let (mut buffer, length) = request_buffer(&name, bytes)?;
        let code = unsafe { send(id, buffer.as_mut_ptr() as *mut c_char, length) };
        if code == 0 {
            Ok(())
        } else {
            Err(RuntimeError::Runtime(format!(
                "{} send failed with error code {}",
                name, code
            )))
        }
    }
}

/// Build the request buffer: payload bytes followed by a NUL the library may
/// rely on. The advertised length excludes the NUL.
fn request_buffer(method: &str, request: &[u8]) -> Result<(Vec<u8>, c_int), RuntimeError> {
    let length = c_int::try_from(request.len()).map_err(|_| RuntimeError::InvalidArgument {
        method: method.to_string(),
        reason: format!("request of {} bytes is too large", request.len()),
    })?;
    let mut buffer = Vec::with_capacity(request.len() + 1);
    buffer.extend_from_slice(request);
    buffer.push(0);
    Ok((buffer, length))
}

fn reply_callback() -> (CCallback, oneshot::Receiver<Reply>) {
    let (tx, rx) = oneshot::channel::<Reply>();
    let context = Box::into_raw(Box::new(tx)) as *mut c_void;
    let callback = CCallback {
        on_response: Some(reply_response),
        on_error: Some(reply_error),
        response_context: context,
        error_context: context,
    };
    (callback, rx)
}

async fn await_reply(
    method: &str,
    rx: oneshot::Receiver<Reply>,
    limit: Duration,
) -> Result<Payload, RuntimeError> {
    match tokio::time::timeout(limit, rx).await {
        Ok(Ok(Ok(bytes))) => Ok(Payload::new(bytes)),
        Ok(Ok(Err(message))) => Err(RuntimeError::Runtime(message)),
        Ok(Err(_)) => Err(RuntimeError::Dropped(method.to_string())),
        Err(_) => {
            log::warn!("{} timed out after {:?}", method, limit);
            Err(RuntimeError::Timeout {
                method: method.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}

unsafe extern "C" fn reply_response(context: *mut c_void, data: *const c_char, length: c_int) {
    if context.is_null() {
        return;
    }
    let sender = Box::from_raw(context as *mut ReplySender);
    let bytes = ffi::copy_bytes(data, length);
    if sender.send(Ok(bytes)).is_err() {
        log::debug!("Reply arrived after the caller gave up");
    }
}

unsafe extern "C" fn reply_error(context: *mut c_void, error: *const c_char) {
    if context.is_null() {
        return;
    }
    let sender = Box::from_raw(context as *mut ReplySender);
    let message = ffi::copy_message(error);
    if sender.send(Err(message)).is_err() {
        log::debug!("Error reply arrived after the caller gave up");
    }
}

unsafe extern "C" fn stream_response(context: *mut c_void, data: *const c_char, length: c_int) {
    if context.is_null() {
        return;
    }
    let sink = &*(context as *const StreamSink);
    sink.push_update(ffi::copy_bytes(data, length));
}

unsafe extern "C" fn stream_error(context: *mut c_void, error: *const c_char) {
    if context.is_null() {
        return;
    }
    let sink = &*(context as *const StreamSink);
    sink.push_error(ffi::copy_message(error));
}
