//! Raw event vocabulary shared by every engine backend.

use std::path::PathBuf;

use bitflags::bitflags;

bitflags! {
	/// Event kinds reported by a native engine, bit-compatible with inotify's `IN_*` constants
	/// so the Linux backend can pass kernel masks through untouched.
	#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
	pub struct EventMask: u32 {
		const MODIFY      = 0x0000_0002;
		const ATTRIB      = 0x0000_0004;
		const MOVED_FROM  = 0x0000_0040;
		const MOVED_TO    = 0x0000_0080;
		const CREATE      = 0x0000_0100;
		const DELETE      = 0x0000_0200;
		const DELETE_SELF = 0x0000_0400;
		const MOVE_SELF   = 0x0000_0800;
		const UNMOUNT     = 0x0000_2000;
		const OVERFLOW    = 0x0000_4000;
		const ISDIR       = 0x4000_0000;
	}
}

impl EventMask {
	/// The entry appeared in scope, either created in place or moved in.
	pub fn is_creation(self) -> bool {
		self.intersects(Self::CREATE | Self::MOVED_TO)
	}

	/// The entry left scope, either deleted or moved out.
	pub fn is_deletion(self) -> bool {
		self.intersects(Self::DELETE | Self::MOVED_FROM)
	}

	/// The watched path itself went away.
	pub fn is_self_removal(self) -> bool {
		self.intersects(Self::DELETE_SELF | Self::MOVE_SELF)
	}

	/// Native watch state is no longer trustworthy and the host has to start over.
	pub fn is_reset(self) -> bool {
		self.intersects(Self::UNMOUNT | Self::OVERFLOW)
	}
}

/// One change notification as the engine saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
	/// Absolute path of the affected entry. Empty for queue-wide events such as overflow.
	pub path: PathBuf,
	pub mask: EventMask,
}

impl RawEvent {
	pub fn new(path: impl Into<PathBuf>, mask: EventMask) -> Self {
		Self {
			path: path.into(),
			mask,
		}
	}

	pub fn overflow() -> Self {
		Self::new(PathBuf::new(), EventMask::OVERFLOW)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_mask_groups() {
		assert!(EventMask::MOVED_TO.is_creation());
		assert!((EventMask::MOVED_FROM | EventMask::ISDIR).is_deletion());
		assert!(EventMask::MOVE_SELF.is_self_removal());
		assert!(EventMask::OVERFLOW.is_reset());
		assert!(!EventMask::MODIFY.is_reset());
		assert!(!EventMask::ATTRIB.is_creation());
	}

	#[test]
	fn test_mask_matches_inotify_bits() {
		// IN_CREATE | IN_ISDIR as read off the wire
		let mask = EventMask::from_bits_truncate(0x4000_0100);
		assert_eq!(mask, EventMask::CREATE | EventMask::ISDIR);
	}
}
