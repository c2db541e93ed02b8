//! Best-effort filesystem identity probe.
//!
//! Returns a number identifying the file or directory at a path: the inode
//! number on Unix, the volume file index on Windows. Any failure (missing
//! path, permission denied, unsupported platform) yields `0`.

use std::path::Path;

/// Identity number for `path`, or `0` when it cannot be determined.
#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
pub fn inode_best_effort(path: &Path) -> u64 {
  rustix::fs::stat(path).map(|stat| stat.st_ino as u64).unwrap_or(0)
}

/// Identity number for `path`, or `0` when it cannot be determined.
#[cfg(windows)]
pub fn inode_best_effort(path: &Path) -> u64 {
  use std::os::windows::fs::OpenOptionsExt;
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{
    BY_HANDLE_FILE_INFORMATION, FILE_FLAG_BACKUP_SEMANTICS, GetFileInformationByHandle,
  };

  // Directories can only be opened with backup semantics.
  let file = match std::fs::OpenOptions::new()
    .read(true)
    .custom_flags(FILE_FLAG_BACKUP_SEMANTICS)
    .open(path)
  {
    Ok(file) => file,
    Err(_) => return 0,
  };

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: BY_HANDLE_FILE_INFORMATION is a plain data struct that is valid when
  // zero-initialized, and the handle stays open for the duration of the call.
  let (ok, info) = unsafe {
    let mut info: BY_HANDLE_FILE_INFORMATION = std::mem::zeroed();
    let ok = GetFileInformationByHandle(handle, &mut info);
    (ok, info)
  };

  if ok == 0 {
    return 0;
  }

  (u64::from(info.nFileIndexHigh) << 32) | u64::from(info.nFileIndexLow)
}

/// Identity number for `path`, or `0` when it cannot be determined.
#[cfg(not(any(unix, windows)))]
pub fn inode_best_effort(_path: &Path) -> u64 {
  0
}
