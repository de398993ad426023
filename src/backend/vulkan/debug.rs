//! Driver diagnostic callbacks. Both mechanisms forward into `tracing` under the
//! `vkrt::validation` target and never ask the driver to abort the call.

use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr};

use ash::vk;

use crate::doctor::{self, Severity};

unsafe fn lossy<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

pub fn report_severity(flags: vk::DebugReportFlagsEXT) -> Severity {
    if flags.contains(vk::DebugReportFlagsEXT::ERROR) {
        Severity::Error
    } else if flags.intersects(vk::DebugReportFlagsEXT::WARNING | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING) {
        Severity::Warning
    } else if flags.contains(vk::DebugReportFlagsEXT::INFORMATION) {
        Severity::Info
    } else {
        Severity::Debug
    }
}

pub fn utils_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Severity {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Severity::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Severity::Warning
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Severity::Info
    } else {
        Severity::Debug
    }
}

pub unsafe extern "system" fn debug_report_callback(
    flags: vk::DebugReportFlagsEXT,
    _object_type: vk::DebugReportObjectTypeEXT,
    _object: u64,
    _location: usize,
    _message_code: i32,
    p_layer_prefix: *const c_char,
    p_message: *const c_char,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let prefix = lossy(p_layer_prefix);
    let message = lossy(p_message);
    doctor::validation_message(report_severity(flags), "report", &prefix, &message);
    vk::FALSE
}

pub unsafe extern "system" fn debug_utils_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let (id, message) = match p_callback_data.as_ref() {
        Some(data) => (lossy(data.p_message_id_name), lossy(data.p_message)),
        None => (Cow::Borrowed(""), Cow::Borrowed("")),
    };
    doctor::validation_message(utils_severity(severity), "utils", &id, &message);
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_severity_mapping() {
        assert_eq!(report_severity(vk::DebugReportFlagsEXT::ERROR | vk::DebugReportFlagsEXT::DEBUG), Severity::Error);
        assert_eq!(report_severity(vk::DebugReportFlagsEXT::PERFORMANCE_WARNING), Severity::Warning);
        assert_eq!(report_severity(vk::DebugReportFlagsEXT::INFORMATION), Severity::Info);
        assert_eq!(report_severity(vk::DebugReportFlagsEXT::DEBUG), Severity::Debug);
    }

    #[test]
    fn test_utils_severity_mapping() {
        assert_eq!(utils_severity(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), Severity::Error);
        assert_eq!(utils_severity(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), Severity::Debug);
    }

    #[test]
    fn test_callbacks_tolerate_null_pointers() {
        let ret = unsafe {
            debug_report_callback(
                vk::DebugReportFlagsEXT::WARNING,
                vk::DebugReportObjectTypeEXT::UNKNOWN,
                0,
                0,
                0,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);

        let ret = unsafe {
            debug_utils_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);
    }
}
