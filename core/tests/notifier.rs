#![cfg(target_os = "linux")]

use fsn_core::{mounts::StaticMounts, Config, Notifier, ProtocolWriter};
use fsn_fs_watcher::InotifyEngine;

use std::{fs, path::Path, time::Duration};

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio::time::Instant;
use tracing_test::traced_test;

type LinuxNotifier = Notifier<InotifyEngine, StaticMounts, Vec<u8>>;

fn notifier(mounts: StaticMounts) -> LinuxNotifier {
	Notifier::new(
		Config {
			missing_root_interval: Duration::ZERO,
			..Default::default()
		},
		InotifyEngine::new().unwrap(),
		mounts,
		ProtocolWriter::new(Vec::new()),
	)
}

fn take_output(notifier: &mut LinuxNotifier) -> String {
	let out = std::mem::replace(notifier.writer_mut(), ProtocolWriter::new(Vec::new()));
	String::from_utf8(out.into_inner()).unwrap()
}

fn root_of(path: &Path) -> String {
	path.to_str().unwrap().to_string()
}

#[test]
#[traced_test]
fn reports_changes_under_a_root() {
	let dir = tempdir().unwrap();
	let root = dir.path().join("project");
	fs::create_dir_all(root.join("src")).unwrap();

	let mut notifier = notifier(StaticMounts::default());
	notifier.update_roots(vec![root_of(&root)]).unwrap();
	assert_eq!(take_output(&mut notifier), "UNWATCHEABLE\n#\nINITIALIZED\n");

	let file = root.join("src/main.rs");
	fs::write(&file, b"fn main() {}").unwrap();
	notifier.tick(Instant::now()).unwrap();

	let out = take_output(&mut notifier);
	let file = file.display();
	assert!(
		out.starts_with(&format!("CREATE\n{file}\nCHANGE\n{file}\n")),
		"{out}"
	);
	assert!(out.contains(&format!("CHANGE\n{file}\n")), "{out}");

	fs::remove_file(root.join("src/main.rs")).unwrap();
	notifier.tick(Instant::now()).unwrap();
	assert_eq!(take_output(&mut notifier), format!("DELETE\n{file}\n"));

	notifier.shutdown();
}

#[test]
fn excluded_mount_stays_silent() {
	let dir = tempdir().unwrap();
	let root = dir.path().join("project");
	let mount = root.join("remote");
	fs::create_dir_all(&mount).unwrap();

	let mut notifier = notifier(StaticMounts::new([mount.clone()]));
	notifier.update_roots(vec![root_of(&root)]).unwrap();
	assert_eq!(
		take_output(&mut notifier),
		format!("UNWATCHEABLE\n{}\n#\nINITIALIZED\n", mount.display())
	);

	fs::write(mount.join("ignored.txt"), b"x").unwrap();
	notifier.tick(Instant::now()).unwrap();
	assert_eq!(take_output(&mut notifier), "");

	notifier.shutdown();
}

#[test]
#[traced_test]
fn deleted_root_is_restored() {
	let dir = tempdir().unwrap();
	let root = dir.path().join("project");
	fs::create_dir(&root).unwrap();

	let mut notifier = notifier(StaticMounts::default());
	notifier.update_roots(vec![root_of(&root)]).unwrap();
	take_output(&mut notifier);

	fs::remove_dir(&root).unwrap();
	notifier.tick(Instant::now()).unwrap();

	assert_eq!(
		take_output(&mut notifier),
		format!("DELETE\n{}\n", root.display())
	);
	assert_eq!(notifier.registry().missing_count(), 1);
	assert_eq!(notifier.engine().watched_directories(), 0);

	fs::create_dir(&root).unwrap();
	notifier.tick(Instant::now()).unwrap();

	assert_eq!(
		take_output(&mut notifier),
		format!("CREATE\n{0}\nCHANGE\n{0}\n", root.display())
	);
	assert_eq!(notifier.registry().missing_count(), 0);
	assert_eq!(notifier.engine().watched_directories(), 1);

	notifier.shutdown();
	assert_eq!(notifier.engine().watched_directories(), 0);
}

#[tokio::test]
async fn serves_host_commands() {
	let dir = tempdir().unwrap();
	let input = format!("ROOTS\n{0}\n|{0}\n#\nROOTS\n#\nEXIT\n", dir.path().display());

	let mut notifier = notifier(StaticMounts::default());
	notifier.run(input.as_bytes()).await.unwrap();

	assert_eq!(take_output(&mut notifier), "UNWATCHEABLE\n#\nINITIALIZED\n");
	assert!(notifier.registry().is_empty());
	assert_eq!(notifier.engine().watched_directories(), 0);
}
