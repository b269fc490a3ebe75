//! Virtual camera driver reached through its interface library
//!
//! The library exports a small C API: `Init`/`Free` bracket its use,
//! `GetNumDevices`/`GetDevicePath` enumerate camera slots, `SetDevice` binds
//! one, and `SetBuffer` copies a frame into the bound device.

use std::ffi::{c_char, c_int, c_void, CStr};

use libloading::Library;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::{check_frame, OutputSink, SinkError};
use crate::{Frame, OutputConfig};

type InitFn = unsafe extern "C" fn() -> c_int;
type FreeFn = unsafe extern "C" fn() -> c_int;
type GetNumDevicesFn = unsafe extern "C" fn() -> c_int;
type GetDevicePathFn = unsafe extern "C" fn(c_int, *mut c_char, c_int) -> c_int;
type DestroyDeviceFn = unsafe extern "C" fn();
type SetDeviceFn = unsafe extern "C" fn(*mut c_char, c_int) -> c_int;
type SetBufferFn = unsafe extern "C" fn(*mut c_void, u32, u32, u32) -> c_int;

const DEVICE_PATH_LEN: usize = 256;

/// Entry points resolved from the library
struct DriverApi {
    init: InitFn,
    free: FreeFn,
    get_num_devices: GetNumDevicesFn,
    get_device_path: GetDevicePathFn,
    set_device: SetDeviceFn,
    set_buffer: SetBufferFn,
}

impl DriverApi {
    fn resolve(library: &Library) -> Result<Self, SinkError> {
        // SAFETY: the signatures match the driver interface exports
        unsafe {
            // Not called, but its absence means a mismatched library
            symbol::<DestroyDeviceFn>(library, "DestroyDevice")?;
            Ok(Self {
                init: symbol(library, "Init")?,
                free: symbol(library, "Free")?,
                get_num_devices: symbol(library, "GetNumDevices")?,
                get_device_path: symbol(library, "GetDevicePath")?,
                set_device: symbol(library, "SetDevice")?,
                set_buffer: symbol(library, "SetBuffer")?,
            })
        }
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T, SinkError> {
    let mut raw = name.as_bytes().to_vec();
    raw.push(0);
    library
        .get::<T>(&raw)
        .map(|sym| *sym)
        .map_err(|_| SinkError::MissingSymbol(name))
}

/// Output bound to one virtual camera slot of the driver
pub struct DriverSink {
    api: DriverApi,
    device: String,
    width: u32,
    height: u32,
    // Declared last so the entry points are never used after unload
    _library: Library,
}

impl DriverSink {
    /// Load the library, initialize it and bind the first matching device
    #[instrument(skip(config), fields(library = %config.driver_library))]
    pub fn bind(config: &OutputConfig) -> Result<Self, SinkError> {
        let pattern = Regex::new(&config.device_pattern)?;

        // SAFETY: loading runs the library's initializers; the driver interface
        // library has no load-time requirements beyond being the right one
        let library = unsafe { Library::new(&config.driver_library) }.map_err(|e| {
            SinkError::Library {
                library: config.driver_library.clone(),
                reason: e.to_string(),
            }
        })?;
        let api = DriverApi::resolve(&library)?;

        // SAFETY: resolved from the loaded library, which outlives every call
        if unsafe { (api.init)() } == 0 {
            return Err(SinkError::DriverCall("Init"));
        }

        let mut sink = Self {
            api,
            device: String::new(),
            width: config.width,
            height: config.height,
            _library: library,
        };
        // From here on, dropping `sink` calls Free
        sink.device = sink.select_device(&pattern)?;
        info!("Bound virtual camera {}", sink.device);

        Ok(sink)
    }

    fn select_device(&self, pattern: &Regex) -> Result<String, SinkError> {
        let count = unsafe { (self.api.get_num_devices)() };
        if count <= 0 {
            return Err(SinkError::NoDevice(pattern.to_string()));
        }
        debug!("Driver reports {} device slots", count);

        for index in 0..count {
            let mut buf = [0u8; DEVICE_PATH_LEN];
            let ok = unsafe {
                (self.api.get_device_path)(
                    index,
                    buf.as_mut_ptr() as *mut c_char,
                    DEVICE_PATH_LEN as c_int,
                )
            };
            if ok == 0 {
                warn!("Failed to get device path for index {}", index);
                continue;
            }

            let path = device_path(&buf);
            let Some(identifier) = match_device(pattern, &path) else {
                debug!("Ignoring device at index {}: {}", index, path);
                continue;
            };
            info!("Found virtual camera at index {}: {}", index, identifier);

            let len = path.len() as c_int;
            if unsafe { (self.api.set_device)(buf.as_mut_ptr() as *mut c_char, len) } == 0 {
                return Err(SinkError::DriverCall("SetDevice"));
            }
            return Ok(path);
        }

        Err(SinkError::NoDevice(pattern.to_string()))
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl OutputSink for DriverSink {
    fn publish(&mut self, frame: &Frame) -> Result<(), SinkError> {
        check_frame(frame, self.width, self.height)?;

        // SAFETY: the driver only reads stride * height bytes, which
        // check_frame guarantees are there
        let ok = unsafe {
            (self.api.set_buffer)(
                frame.data.as_ptr() as *mut c_void,
                frame.stride,
                self.width,
                self.height,
            )
        };
        if ok == 0 {
            return Err(SinkError::DriverCall("SetBuffer"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "driver"
    }
}

impl Drop for DriverSink {
    fn drop(&mut self) {
        if unsafe { (self.api.free)() } == 0 {
            warn!("Driver Free call failed");
        }
    }
}

/// NUL-terminated device path out of a fixed buffer
fn device_path(buf: &[u8]) -> String {
    CStr::from_bytes_until_nul(buf)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(buf).into_owned())
}

/// Identifier part of a device path, if it is a virtual camera
fn match_device<'a>(pattern: &Regex, path: &'a str) -> Option<&'a str> {
    pattern.find(path).map(|m| m.as_str())
}
