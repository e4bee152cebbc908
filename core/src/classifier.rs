//! Raw engine events to protocol verbs.

use crate::{
	protocol::{EventKind, ProtocolWriter},
	registry::RootRegistry,
};

use std::io::{self, Write};

use fsn_fs_watcher::{EventMask, RawEvent, WatchEngine};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
	/// Native state under a mount, or the whole queue, is gone; nothing path scoped is reported
	Reset,
	Path {
		kinds: Vec<EventKind>,
		/// The path itself was deleted or renamed away, a root may have been lost
		self_removed: bool,
	},
}

/// Map an event mask to the verbs it implies, in emission order.
pub fn classify(mask: EventMask) -> Classified {
	if mask.is_reset() {
		return Classified::Reset;
	}

	let mut kinds = Vec::with_capacity(2);

	if mask.is_creation() {
		kinds.extend([EventKind::Create, EventKind::Change]);
	}
	if mask.contains(EventMask::MODIFY) {
		kinds.push(EventKind::Change);
	}
	if mask.contains(EventMask::ATTRIB) {
		kinds.push(EventKind::Stats);
	}
	if mask.is_deletion() {
		kinds.push(EventKind::Delete);
	}

	Classified::Path {
		kinds,
		self_removed: mask.is_self_removal(),
	}
}

/// Report one raw event, releasing any root it took away with it.
pub fn process_event<E, W>(
	registry: &mut RootRegistry,
	engine: &mut E,
	out: &mut ProtocolWriter<W>,
	event: &RawEvent,
) -> io::Result<()>
where
	E: WatchEngine,
	W: Write,
{
	trace!(path = %event.path.display(), mask = ?event.mask, "Raw event");

	match classify(event.mask) {
		Classified::Reset => {
			debug!(mask = ?event.mask, "Native watch state invalidated;");
			out.reset()
		}

		Classified::Path {
			kinds,
			self_removed,
		} => {
			for kind in kinds {
				out.event(kind, &event.path)?;
			}

			if self_removed && registry.mark_removed(engine, &event.path) > 0 {
				out.event(EventKind::Delete, &event.path)?;
			}

			Ok(())
		}
	}
}
