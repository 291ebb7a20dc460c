// crates/launcher/src/image.rs

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use libc::c_char;

use crate::ExecRequest;
use crate::error::ExecError;

/// A fully materialised program image.
///
/// All allocation happens here, before the fork, so the child only reads
/// through the prepared pointer arrays.
pub(crate) struct ExecImage {
    program: CString,
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    _envp: Option<Vec<CString>>,
    envp_ptrs: Option<Vec<*const c_char>>,
    diagnostic: Vec<u8>,
}

impl ExecImage {
    pub(crate) fn new(req: &ExecRequest) -> Result<Self, ExecError> {
        let argv = req
            .argv()
            .iter()
            .map(|a| to_cstring(a))
            .collect::<Result<Vec<_>, _>>()?;
        let first = argv.first().ok_or(ExecError::EmptyArgv)?;
        let program = match req.executable_path() {
            Some(path) => to_cstring(path)?,
            None => first.clone(),
        };
        let argv_ptrs = null_terminated(&argv);

        let envp = match req.env_override() {
            Some(vars) => Some(
                vars.iter()
                    .map(|(k, v)| {
                        let mut entry = k.clone();
                        entry.push("=");
                        entry.push(v);
                        to_cstring(&entry)
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };
        let envp_ptrs = envp.as_deref().map(null_terminated);

        let mut diagnostic = b"cannot execute binary '".to_vec();
        diagnostic.extend_from_slice(program.as_bytes());
        diagnostic.extend_from_slice(b"': errno ");

        Ok(Self {
            program,
            _argv: argv,
            argv_ptrs,
            _envp: envp,
            envp_ptrs,
            diagnostic,
        })
    }

    pub(crate) fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Replace the current process image. Returns only on failure, with
    /// `errno` describing why.
    ///
    /// # Safety
    /// Must only be called in a freshly forked child.
    pub(crate) unsafe fn exec(&self) {
        // SAFETY: both pointer arrays are null terminated and point into
        // `CString`s owned by `self`, which outlives the call.
        unsafe {
            match &self.envp_ptrs {
                Some(envp) => {
                    libc::execve(self.program.as_ptr(), self.argv_ptrs.as_ptr(), envp.as_ptr());
                }
                None => {
                    libc::execvp(self.program.as_ptr(), self.argv_ptrs.as_ptr());
                }
            }
        }
    }

    /// Prefix of the message written to fd 2 when exec fails.
    pub(crate) fn diagnostic(&self) -> &[u8] {
        &self.diagnostic
    }
}

fn to_cstring(arg: &OsStr) -> Result<CString, ExecError> {
    CString::new(arg.as_bytes()).map_err(|_| ExecError::Nul(arg.to_os_string()))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn rejects_empty_argv() {
        let req = ExecRequest::new(Vec::<&str>::new());
        assert!(matches!(ExecImage::new(&req), Err(ExecError::EmptyArgv)));
    }

    #[test]
    fn rejects_interior_nul() {
        let req = ExecRequest::new(["echo", "a\0b"]);
        assert!(matches!(ExecImage::new(&req), Err(ExecError::Nul(_))));
        let req = ExecRequest::new(["env"]).env("K\0", "v");
        assert!(matches!(ExecImage::new(&req), Err(ExecError::Nul(_))));
    }

    #[test]
    fn pointer_arrays_are_null_terminated() {
        let req = ExecRequest::new(["sh", "-c", "true"]).env("A", "1");
        let image = ExecImage::new(&req).unwrap();
        assert_eq!(image.argv_ptrs.len(), 4);
        assert!(image.argv_ptrs[3].is_null());
        let envp = image.envp_ptrs.as_ref().unwrap();
        assert_eq!(envp.len(), 2);
        // SAFETY: the pointer refers to a CString owned by `image`.
        let first = unsafe { CStr::from_ptr(envp[0]) };
        assert_eq!(first.to_bytes(), b"A=1");
        assert_eq!(image.program_name(), "sh");
    }

    #[test]
    fn explicit_executable_keeps_argv_zero() {
        let req = ExecRequest::new(["sh", "-c", "true"])
            .executable("/bin/sh")
            .env("A", "1");
        let image = ExecImage::new(&req).unwrap();
        assert_eq!(image.program_name(), "/bin/sh");
        // SAFETY: the pointer refers to a CString owned by `image`.
        let zero = unsafe { CStr::from_ptr(image.argv_ptrs[0]) };
        assert_eq!(zero.to_bytes(), b"sh");
    }

    #[test]
    fn inherited_environment_has_no_envp() {
        let image = ExecImage::new(&ExecRequest::new(["true"])).unwrap();
        assert!(image.envp_ptrs.is_none());
        assert!(image.diagnostic().starts_with(b"cannot execute binary 'true'"));
    }
}
