// FFI bindings for C/C++/C#/Python
use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int};
use std::slice;

use crate::{detect, Detection, DetectionParameters, EngineError, Frame};

/// C-compatible detection record
#[repr(C)]
pub struct CDetection {
    pub center_x: c_float,
    pub center_y: c_float,
    pub radius: c_float,
    pub bbox_x: u32,
    pub bbox_y: u32,
    pub bbox_width: u32,
    pub bbox_height: u32,
    pub area: u32,
    pub perimeter: c_float,
    pub circularity: c_float,
    pub eccentricity: c_float,
}

const ERR_NULL: c_int = -1;
const ERR_ARGUMENT: c_int = -2;
const ERR_DETECT: c_int = -3;

/// Detect cells in a tightly packed 8-bit grayscale buffer
///
/// # Safety
/// - data must point to width * height readable bytes
/// - params_json may be null (defaults) or a valid null-terminated UTF-8 string
/// - results_out will be allocated and must be freed with cseg_free_detections
#[no_mangle]
pub unsafe extern "C" fn cseg_detect_gray8(
    data: *const u8,
    width: u32,
    height: u32,
    params_json: *const c_char,
    results_out: *mut *mut CDetection,
    count_out: *mut usize,
) -> c_int {
    detect_raw(data, width, height, 1, params_json, results_out, count_out)
}

/// Detect cells in a tightly packed 8-bit RGB buffer
///
/// # Safety
/// - data must point to width * height * 3 readable bytes
/// - params_json may be null (defaults) or a valid null-terminated UTF-8 string
/// - results_out will be allocated and must be freed with cseg_free_detections
#[no_mangle]
pub unsafe extern "C" fn cseg_detect_rgb8(
    data: *const u8,
    width: u32,
    height: u32,
    params_json: *const c_char,
    results_out: *mut *mut CDetection,
    count_out: *mut usize,
) -> c_int {
    detect_raw(data, width, height, 3, params_json, results_out, count_out)
}

/// Free results returned from cseg_detect_gray8 or cseg_detect_rgb8
///
/// # Safety
/// - results must be a pointer returned from one of the detect functions
/// - count must match the count returned alongside it
#[no_mangle]
pub unsafe extern "C" fn cseg_free_detections(results: *mut CDetection, count: usize) {
    if results.is_null() {
        return;
    }
    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(results, count)));
}

/// Get library version
#[no_mangle]
pub extern "C" fn cseg_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

unsafe fn detect_raw(
    data: *const u8,
    width: u32,
    height: u32,
    channels: usize,
    params_json: *const c_char,
    results_out: *mut *mut CDetection,
    count_out: *mut usize,
) -> c_int {
    if data.is_null() || results_out.is_null() || count_out.is_null() {
        return ERR_NULL;
    }

    let params = match parse_params(params_json) {
        Ok(p) => p,
        Err(_) => return ERR_ARGUMENT,
    };

    let len = width as usize * height as usize * channels;
    let buffer = slice::from_raw_parts(data, len).to_vec();
    let frame = match channels {
        1 => Frame::from_gray8(width, height, buffer),
        _ => Frame::from_rgb8(width, height, buffer),
    };
    let frame = match frame {
        Ok(f) => f,
        Err(_) => return ERR_ARGUMENT,
    };

    let detections = match detect(&frame, None, &params) {
        Ok(d) => d,
        Err(_) => return ERR_DETECT,
    };

    let c_results = detections_to_c(&detections);
    *count_out = c_results.len();
    *results_out = Box::into_raw(c_results) as *mut CDetection;

    0
}

unsafe fn parse_params(params_json: *const c_char) -> Result<DetectionParameters, EngineError> {
    if params_json.is_null() {
        return Ok(DetectionParameters::default());
    }
    let text = CStr::from_ptr(params_json)
        .to_str()
        .map_err(|e| EngineError::InvalidParameter(e.to_string()))?;
    DetectionParameters::from_json_str(text)
}

fn detections_to_c(detections: &[Detection]) -> Box<[CDetection]> {
    detections
        .iter()
        .map(|d| CDetection {
            center_x: d.center.x,
            center_y: d.center.y,
            radius: d.radius,
            bbox_x: d.bbox.x,
            bbox_y: d.bbox.y,
            bbox_width: d.bbox.width,
            bbox_height: d.bbox.height,
            area: d.area,
            perimeter: d.perimeter,
            circularity: d.circularity,
            eccentricity: d.eccentricity,
        })
        .collect()
}
