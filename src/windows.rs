//! Native binding over the Win32 low-level hook API.
//!
//! # Safety
//!
//! `unsafe` is limited to the Win32 FFI calls and to reading the hook structure the
//! OS passes by pointer. Each block carries a `// SAFETY:` note.

use std::ffi::c_void;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx,
    HHOOK, KBDLLHOOKSTRUCT, MSG, MSLLHOOKSTRUCT, WINDOWS_HOOK_ID, WM_QUIT,
};

use crate::binding::{
    HookBinding, HookHandle, HookKind, KeyboardData, MouseData, NativeThreadId, PumpMessage,
    RawEvent, RawPayload,
};
use crate::error::HookError;
use crate::message::HC_ACTION;
use crate::trampoline::{self, Trampoline};

/// Win32 implementation of [`HookBinding`].
pub struct WindowsBinding {
    // HMODULE of the running executable, kept as an address so the binding is Send.
    module: usize,
}

impl WindowsBinding {
    /// Resolve the host module handle. Fails instead of deferring the error to install.
    pub fn new() -> Result<Self, HookError> {
        // SAFETY: a null name asks for the module of the running executable, which
        // stays loaded for the life of the process.
        let module = unsafe { GetModuleHandleW(PCWSTR::null()) }
            .map_err(|e| HookError::Unsupported(format!("module handle unavailable: {}", e)))?;
        Ok(Self {
            module: module.0 as usize,
        })
    }
}

impl HookBinding for WindowsBinding {
    fn current_thread_id(&self) -> NativeThreadId {
        // SAFETY: no preconditions.
        NativeThreadId(unsafe { GetCurrentThreadId() })
    }

    fn register(
        &self,
        kind: HookKind,
        _trampoline: &Trampoline,
        _thread: NativeThreadId,
    ) -> Option<HookHandle> {
        // SAFETY: `hook_proc` is a plain function that lives for the whole process, and
        // the calling thread pumps messages until it unregisters.
        let hook = unsafe {
            SetWindowsHookExW(
                WINDOWS_HOOK_ID(kind.hook_id()),
                Some(hook_proc),
                Some(HINSTANCE(self.module as *mut c_void)),
                0,
            )
        };
        match hook {
            Ok(hook) if !hook.is_invalid() => Some(HookHandle(hook.0 as usize)),
            Ok(_) => None,
            Err(e) => {
                log::error!("SetWindowsHookExW failed for {} hook: {}", kind, e);
                None
            }
        }
    }

    fn unregister(&self, handle: HookHandle) -> bool {
        // SAFETY: the handle came from `register` on this thread and is removed once.
        unsafe { UnhookWindowsHookEx(HHOOK(handle.0 as *mut c_void)) }.is_ok()
    }

    fn pump_next_message(&self, _thread: NativeThreadId) -> PumpMessage {
        let mut msg = MSG::default();
        // SAFETY: `msg` is a valid out pointer. Hook procedures registered by this
        // thread run inside this call.
        let result = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        match result.0 {
            0 => PumpMessage::Quit,
            -1 => PumpMessage::Failed,
            _ if msg.message == WM_QUIT => PumpMessage::Quit,
            _ => PumpMessage::Message,
        }
    }

    fn post_quit(&self, thread: NativeThreadId) -> bool {
        // SAFETY: posting to a thread queue has no memory preconditions; a thread that
        // has already exited makes the call fail.
        unsafe { PostThreadMessageW(thread.0, WM_QUIT, WPARAM(0), LPARAM(0)) }.is_ok()
    }

    fn chain_next(&self, handle: Option<HookHandle>, code: i32, event: &RawEvent) -> isize {
        let hook = handle.map(|h| HHOOK(h.0 as *mut c_void));
        // SAFETY: forwards the untouched wParam/lParam received from the OS.
        unsafe {
            CallNextHookEx(
                hook,
                code,
                WPARAM(event.message as usize),
                LPARAM(event.lparam),
            )
        }
        .0
    }
}

/// The one hook procedure handed to the OS for both hook kinds.
///
/// Routes to the trampoline active on the calling pump thread.
unsafe extern "system" fn hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let routed = trampoline::with_active(|trampoline| {
        let payload = if code == HC_ACTION && lparam.0 != 0 {
            // SAFETY: for HC_ACTION the OS passes a pointer to the structure matching
            // the hook kind, valid for the duration of this call.
            Some(unsafe { read_payload(trampoline.kind(), lparam) })
        } else {
            None
        };
        let event = RawEvent {
            message: wparam.0 as u32,
            payload,
            lparam: lparam.0,
        };
        trampoline.invoke(code, &event)
    });
    match routed {
        Some(result) => LRESULT(result),
        // SAFETY: no trampoline on this thread; pass the call through untouched.
        None => unsafe { CallNextHookEx(None, code, wparam, lparam) },
    }
}

unsafe fn read_payload(kind: HookKind, lparam: LPARAM) -> RawPayload {
    match kind {
        HookKind::Keyboard => {
            let info = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
            RawPayload::Keyboard(KeyboardData {
                vk_code: info.vkCode,
                scan_code: info.scanCode,
                flags: info.flags.0,
                time: info.time,
            })
        }
        HookKind::Mouse => {
            let info = &*(lparam.0 as *const MSLLHOOKSTRUCT);
            RawPayload::Mouse(MouseData {
                x: info.pt.x,
                y: info.pt.y,
                mouse_data: info.mouseData,
                flags: info.flags,
                time: info.time,
            })
        }
    }
}
