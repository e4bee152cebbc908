//! Mount table snapshots and the filesystem types we refuse to watch.

use crate::error::{FileIOError, MountError};

use std::path::PathBuf;

use tracing::{debug, trace};

/// Primary mount table, kept by the mount tooling
pub const MTAB_PATH: &str = "/etc/mtab";
/// Kernel's own view, used when the primary table is absent
pub const PROC_MOUNTS_PATH: &str = "/proc/self/mounts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
	pub mount_point: PathBuf,
	pub filesystem_type: String,
}

impl MountEntry {
	pub fn is_watchable(&self) -> bool {
		is_watchable_filesystem(&self.filesystem_type)
	}
}

/// Network, pseudo and swap filesystems can't be watched reliably. Block backed fuse mounts are fine.
pub fn is_watchable_filesystem(filesystem_type: &str) -> bool {
	if filesystem_type.starts_with("dev") {
		return false;
	}

	if filesystem_type.starts_with("fuse") {
		return filesystem_type == "fuseblk";
	}

	!matches!(filesystem_type, "proc" | "sysfs" | "swap" | "cifs" | "nfs")
}

/// Source of the unwatchable mount points consulted on every root update.
pub trait MountSource {
	/// Mount points that must not be watched, in table order.
	fn unwatchable_mounts(&self) -> Result<Vec<PathBuf>, MountError>;
}

/// Reads the system mount table from disk.
#[derive(Debug, Clone)]
pub struct MountTable {
	candidates: Vec<PathBuf>,
}

impl Default for MountTable {
	#[cfg(any(target_os = "linux", target_os = "android"))]
	fn default() -> Self {
		Self {
			candidates: vec![MTAB_PATH.into(), PROC_MOUNTS_PATH.into()],
		}
	}

	/// Elsewhere there is no fstab formatted table and every mount is considered watchable.
	#[cfg(not(any(target_os = "linux", target_os = "android")))]
	fn default() -> Self {
		Self {
			candidates: Vec::new(),
		}
	}
}

impl MountTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Read from `path` only, with no fallback.
	pub fn with_path(path: impl Into<PathBuf>) -> Self {
		Self {
			candidates: vec![path.into()],
		}
	}

	pub fn entries(&self) -> Result<Vec<MountEntry>, MountError> {
		let mut last_error = None;

		for candidate in &self.candidates {
			match std::fs::read(candidate) {
				Ok(contents) => {
					trace!(table = %candidate.display(), "Read mount table");
					return Ok(parse_mount_table(&contents));
				}
				Err(e) => {
					debug!(?e, table = %candidate.display(), "Unable to open mount table;");
					last_error = Some(FileIOError::from_std_io_err_with_msg(
						candidate,
						e,
						"mount table",
					));
				}
			}
		}

		match last_error {
			Some(e) => Err(e.into()),
			None => Ok(Vec::new()),
		}
	}
}

impl MountSource for MountTable {
	fn unwatchable_mounts(&self) -> Result<Vec<PathBuf>, MountError> {
		let mounts = self
			.entries()?
			.into_iter()
			.filter(|entry| !entry.is_watchable())
			.inspect(|entry| {
				trace!(
					mount_point = %entry.mount_point.display(),
					filesystem_type = %entry.filesystem_type,
					"Unwatchable mount"
				)
			})
			.map(|entry| entry.mount_point)
			.collect();

		Ok(mounts)
	}
}

/// Fixed list of unwatchable mount points, or a canned failure.
#[derive(Debug, Clone, Default)]
pub struct StaticMounts {
	mounts: Vec<PathBuf>,
	unreadable: bool,
}

impl StaticMounts {
	pub fn new(mounts: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
		Self {
			mounts: mounts.into_iter().map(Into::into).collect(),
			unreadable: false,
		}
	}

	pub fn unreadable() -> Self {
		Self {
			mounts: Vec::new(),
			unreadable: true,
		}
	}
}

impl MountSource for StaticMounts {
	fn unwatchable_mounts(&self) -> Result<Vec<PathBuf>, MountError> {
		if self.unreadable {
			return Err(FileIOError::from_std_io_err(
				MTAB_PATH,
				std::io::ErrorKind::PermissionDenied.into(),
			)
			.into());
		}

		Ok(self.mounts.clone())
	}
}

/// Parse fstab formatted lines: device, mount point, type, options, ...
///
/// Entries of type `ignore` are placeholders kept by automounters and are dropped.
///
/// Mount points are raw bytes, they need not be valid UTF-8.
pub fn parse_mount_table(contents: &[u8]) -> Vec<MountEntry> {
	contents
		.split(|byte| *byte == b'\n')
		.map(<[u8]>::trim_ascii_start)
		.filter(|line| !line.is_empty() && !line.starts_with(b"#"))
		.filter_map(|line| {
			let mut fields = line
				.split(u8::is_ascii_whitespace)
				.filter(|field| !field.is_empty());
			let _device = fields.next()?;
			let mount_point = fields.next()?;
			let filesystem_type = String::from_utf8_lossy(fields.next()?);

			(filesystem_type != "ignore").then(|| MountEntry {
				mount_point: bytes_to_path(unescape(mount_point)),
				filesystem_type: filesystem_type.into_owned(),
			})
		})
		.collect()
}

/// Undo the `\ooo` octal escaping mount tables use for whitespace and backslashes.
fn unescape(bytes: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;

	while i < bytes.len() {
		if bytes[i] == b'\\' {
			if let Some(digits) = bytes
				.get(i + 1..i + 4)
				.filter(|digits| digits.iter().all(|d| (b'0'..=b'7').contains(d)))
			{
				let value = digits
					.iter()
					.fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
				if let Ok(byte) = u8::try_from(value) {
					out.push(byte);
					i += 4;
					continue;
				}
			}
		}

		out.push(bytes[i]);
		i += 1;
	}

	out
}

#[cfg(unix)]
fn bytes_to_path(bytes: Vec<u8>) -> PathBuf {
	use std::os::unix::ffi::OsStringExt;

	PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: Vec<u8>) -> PathBuf {
	PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
udev /dev devtmpfs rw,nosuid,relatime 0 0
/dev/sda1 / ext4 rw,relatime 0 0
//server/share /mnt/share cifs rw 0 0
server:/export /mnt/nfs nfs rw 0 0
sshfs#host: /mnt/remote fuse.sshfs rw 0 0
/dev/sdb1 /media/usb\\040stick fuseblk rw 0 0
map\\040auto /net ignore rw 0 0
/swapfile none swap sw 0 0
";

	#[test]
	fn test_watchable_types() {
		for fs in ["ext4", "btrfs", "xfs", "tmpfs", "fuseblk", "vfat"] {
			assert!(is_watchable_filesystem(fs), "{fs}");
		}
		for fs in [
			"devtmpfs", "devpts", "proc", "sysfs", "swap", "fuse", "fuse.sshfs", "cifs", "nfs",
		] {
			assert!(!is_watchable_filesystem(fs), "{fs}");
		}
	}

	#[test]
	fn test_parse_table() {
		let entries = parse_mount_table(TABLE.as_bytes());

		assert_eq!(entries.len(), 9);
		assert!(entries.iter().all(|e| e.filesystem_type != "ignore"));
		assert_eq!(
			entries[7],
			MountEntry {
				mount_point: PathBuf::from("/media/usb stick"),
				filesystem_type: "fuseblk".to_string(),
			}
		);
	}

	#[test]
	fn test_unwatchable_from_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("mtab");
		std::fs::write(&path, TABLE).unwrap();

		let mounts = MountTable::with_path(&path).unwatchable_mounts().unwrap();
		assert_eq!(
			mounts,
			[
				"/sys",
				"/proc",
				"/dev",
				"/mnt/share",
				"/mnt/nfs",
				"/mnt/remote",
				"none"
			]
			.into_iter()
			.map(PathBuf::from)
			.collect::<Vec<_>>()
		);
	}

	#[test]
	fn test_empty_table_is_fine() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("mtab");
		std::fs::write(&path, "").unwrap();

		assert!(MountTable::with_path(&path)
			.unwatchable_mounts()
			.unwrap()
			.is_empty());
	}

	#[test]
	fn test_missing_table_fails() {
		let dir = tempdir().unwrap();
		let err = MountTable::with_path(dir.path().join("nope"))
			.unwatchable_mounts()
			.unwrap_err();
		assert!(matches!(err, MountError::Unreadable(_)));
	}

	#[test]
	fn test_falls_back_to_next_table() {
		let dir = tempdir().unwrap();
		let second = dir.path().join("mounts");
		std::fs::write(&second, "proc /proc proc rw 0 0\n").unwrap();

		let table = MountTable {
			candidates: vec![dir.path().join("mtab"), second],
		};
		assert_eq!(table.unwatchable_mounts().unwrap(), vec![PathBuf::from("/proc")]);
	}

	#[test]
	fn test_unescape() {
		assert_eq!(unescape(b"/a\\040b"), b"/a b");
		assert_eq!(unescape(b"/a\\134b"), b"/a\\b");
		assert_eq!(unescape(b"/trailing\\"), b"/trailing\\");
		assert_eq!(unescape(b"/short\\04"), b"/short\\04");
	}

	#[cfg(unix)]
	#[test]
	fn test_non_utf8_mount_point_is_kept_verbatim() {
		use std::os::unix::ffi::OsStrExt;

		let table = b"server:/export /mnt/caf\xe9\\040share nfs rw 0 0\n";
		let entries = parse_mount_table(table);

		assert_eq!(entries.len(), 1);
		assert_eq!(
			entries[0].mount_point.as_os_str().as_bytes(),
			b"/mnt/caf\xe9 share"
		);
		assert!(!entries[0].is_watchable());
	}
}
