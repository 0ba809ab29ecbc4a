//! Looks up the invoking user's passwd entry for the fields `info`
//! reports (home directory, username).
use std::ffi::CStr;

use anyhow::anyhow;
use nix::errno::Errno;

#[derive(Debug)]
pub struct Info {
    pub home_dir: String,
    pub user: String,
}

pub fn info() -> anyhow::Result<Info> {
    Errno::clear();
    // SAFETY: passwd points into libc's static buffer; copied out into
    // owned Strings before anything else can overwrite it.
    unsafe {
        let passwd = libc::getpwuid(libc::getuid());
        if passwd.is_null() {
            return Err(anyhow!("error getting passwd entry: {:?}", Errno::last()));
        }

        Ok(Info {
            home_dir: String::from_utf8_lossy(CStr::from_ptr((*passwd).pw_dir).to_bytes()).into_owned(),
            user: String::from_utf8_lossy(CStr::from_ptr((*passwd).pw_name).to_bytes()).into_owned(),
        })
    }
}
