//! C ABI of the LND library
//!
//! Mirrors the callback structs and entry point signatures from `liblnd.h`
//! and resolves them from the shared library at runtime.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::{Path, PathBuf};

use super::runtime::RuntimeError;

pub type ResponseFn = unsafe extern "C" fn(context: *mut c_void, data: *const c_char, length: c_int);
pub type ErrorFn = unsafe extern "C" fn(context: *mut c_void, error: *const c_char);

/// Callback pair for calls that answer once
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CCallback {
    pub on_response: Option<ResponseFn>,
    pub on_error: Option<ErrorFn>,
    pub response_context: *mut c_void,
    pub error_context: *mut c_void,
}

/// Callback pair for server and bidirectional streams, invoked once per message
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CRecvStream {
    pub on_response: Option<ResponseFn>,
    pub on_error: Option<ErrorFn>,
    pub response_context: *mut c_void,
    pub error_context: *mut c_void,
}

/// `void start(char* args, CCallback callback)`
pub type StartFn = unsafe extern "C" fn(args: *mut c_char, callback: CCallback);

/// `void getInfo(char* data, int length, CCallback callback)` and friends
pub type UnaryFn = unsafe extern "C" fn(data: *mut c_char, length: c_int, callback: CCallback);

/// `void subscribeState(char* data, int length, CRecvStream stream)` and friends
pub type StreamFn = unsafe extern "C" fn(data: *mut c_char, length: c_int, stream: CRecvStream);

/// `uintptr_t channelAcceptor(CRecvStream stream)`, returns the stream id or 0
pub type BiStreamFn = unsafe extern "C" fn(stream: CRecvStream) -> usize;

/// `int SendStreamC(uintptr_t stream, char* data, int length)`
pub type SendStreamFn =
    unsafe extern "C" fn(stream: usize, data: *mut c_char, length: c_int) -> c_int;

/// `int StopStreamC(uintptr_t stream)`
pub type StopStreamFn = unsafe extern "C" fn(stream: usize) -> c_int;

/// Default library file next to the launcher
pub fn default_library_path() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("./liblnd.dylib")
    }

    #[cfg(target_os = "windows")]
    {
        PathBuf::from("./liblnd.dll")
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("./liblnd.so")
    }
}

/// Copy a (data, length) pair handed to a callback into owned bytes
///
/// # Safety
/// `data` must be null or point to at least `length` readable bytes.
pub unsafe fn copy_bytes(data: *const c_char, length: c_int) -> Vec<u8> {
    if data.is_null() || length <= 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(data as *const u8, length as usize).to_vec()
}

/// Copy a NUL-terminated error message handed to a callback
///
/// # Safety
/// `error` must be null or point to a NUL-terminated string.
pub unsafe fn copy_message(error: *const c_char) -> String {
    if error.is_null() {
        return "unknown error".to_string();
    }
    CStr::from_ptr(error).to_string_lossy().into_owned()
}

/// Handle to the loaded LND shared library.
///
/// The library is never unloaded: the node keeps background threads running
/// inside it for the lifetime of the process.
#[derive(Debug)]
pub struct NodeLibrary {
    handle: *mut c_void,
    path: PathBuf,
}

// The handle is only passed to dlsym, which is thread safe.
unsafe impl Send for NodeLibrary {}
unsafe impl Sync for NodeLibrary {}

impl NodeLibrary {
    /// Load the library with `dlopen(RTLD_LAZY)`
    #[cfg(unix)]
    pub fn open(path: &Path) -> Result<Self, RuntimeError> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path =
            CString::new(path.as_os_str().as_bytes()).map_err(|_| RuntimeError::LibraryLoad {
                path: path.display().to_string(),
                reason: "path contains a NUL byte".to_string(),
            })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            return Err(RuntimeError::LibraryLoad {
                path: path.display().to_string(),
                reason: last_dl_error(),
            });
        }

        log::info!("LND library loaded from {}", path.display());
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    #[cfg(not(unix))]
    pub fn open(path: &Path) -> Result<Self, RuntimeError> {
        Err(RuntimeError::Unsupported(format!(
            "loading {} is only supported on unix platforms",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn symbol(&self, name: &str) -> Result<*mut c_void, RuntimeError> {
        use std::ffi::CString;

        let c_name =
            CString::new(name).map_err(|_| RuntimeError::SymbolNotFound(name.to_string()))?;
        let symbol = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        if symbol.is_null() {
            log::error!("Failed to load function: {} - {}", name, last_dl_error());
            return Err(RuntimeError::SymbolNotFound(name.to_string()));
        }
        Ok(symbol)
    }

    #[cfg(not(unix))]
    fn symbol(&self, name: &str) -> Result<*mut c_void, RuntimeError> {
        let _ = self.handle;
        Err(RuntimeError::SymbolNotFound(name.to_string()))
    }

    pub fn start_fn(&self) -> Result<StartFn, RuntimeError> {
        let symbol = self.symbol(super::runtime::START)?;
        Ok(unsafe { std::mem::transmute::<*mut c_void, StartFn>(symbol) })
    }

    pub fn unary_fn(&self, name: &str) -> Result<UnaryFn, RuntimeError> {
        let symbol = self.symbol(name)?;
        Ok(unsafe { std::mem::transmute::<*mut c_void, UnaryFn>(symbol) })
    }

    pub fn stream_fn(&self, name: &str) -> Result<StreamFn, RuntimeError> {
        let symbol = self.symbol(name)?;
        Ok(unsafe { std::mem::transmute::<*mut c_void, StreamFn>(symbol) })
    }

    pub fn bi_stream_fn(&self, name: &str) -> Result<BiStreamFn, RuntimeError> {
        let symbol = self.symbol(name)?;
        Ok(unsafe { std::mem::transmute::<*mut c_void, BiStreamFn>(symbol) })
    }

    pub fn send_stream_fn(&self) -> Result<SendStreamFn, RuntimeError> {
        let symbol = self.symbol(super::runtime::SEND_STREAM)?;
        Ok(unsafe { std::mem::transmute::<*mut c_void, SendStreamFn>(symbol) })
    }

    pub fn stop_stream_fn(&self) -> Result<StopStreamFn, RuntimeError> {
        let symbol = self.symbol(super::runtime::STOP_STREAM)?;
        Ok(unsafe { std::mem::transmute::<*mut c_void, StopStreamFn>(symbol) })
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    let error = unsafe { libc::dlerror() };
    if error.is_null() {
        "unknown error".to_string()
    } else {
        unsafe { CStr::from_ptr(error) }.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_copy_bytes_handles_null_and_empty() {
        assert!(unsafe { copy_bytes(std::ptr::null(), 4) }.is_empty());

        let data = [1u8, 2, 3];
        let ptr = data.as_ptr() as *const c_char;
        assert!(unsafe { copy_bytes(ptr, 0) }.is_empty());
        assert_eq!(unsafe { copy_bytes(ptr, 3) }, vec![1, 2, 3]);
    }

    #[test]
    fn test_copy_message() {
        let message = CString::new("wallet locked").unwrap();
        assert_eq!(unsafe { copy_message(message.as_ptr()) }, "wallet locked");
        assert_eq!(unsafe { copy_message(std::ptr::null()) }, "unknown error");
    }

    #[cfg(unix)]
    #[test]
    fn test_open_missing_library() {
        let err = NodeLibrary::open(Path::new("/nonexistent/liblnd.so")).unwrap_err();
        assert!(matches!(err, RuntimeError::LibraryLoad { .. }));
    }
}
