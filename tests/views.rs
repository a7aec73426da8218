// tests/views.rs

//! View semantics: the original view is read-only and reconstructed, the
//! sidecar is invisible, and the working view behaves like the plain tree.

mod common;

use common::{names, read_all, seed, setup, write_at};
use cowfs::FileKind;

#[test]
fn original_view_refuses_mutation() {
    let (dir, mut overlay) = setup();
    seed(&dir, "a", b"data");

    assert_eq!(
        overlay
            .create("/.original/new", 0o644)
            .unwrap_err()
            .to_errno(),
        libc::EACCES
    );
    assert_eq!(
        overlay.unlink("/.original/a").unwrap_err().to_errno(),
        libc::EACCES
    );
    assert_eq!(
        overlay.truncate("/.original/a", 0).unwrap_err().to_errno(),
        libc::EACCES
    );
    assert_eq!(
        overlay.mkdir("/.original/d", 0o755).unwrap_err().to_errno(),
        libc::EACCES
    );
    assert_eq!(
        overlay
            .rename("/.original/a", "/b")
            .unwrap_err()
            .to_errno(),
        libc::EACCES
    );
    assert_eq!(
        overlay.rename("/a", "/.original/b").unwrap_err().to_errno(),
        libc::EACCES
    );

    let mut handle = overlay.open("/.original/a").unwrap();
    assert_eq!(
        overlay
            .write(&mut handle, 0, b"x")
            .unwrap_err()
            .to_errno(),
        libc::EACCES
    );
}

#[test]
fn original_view_is_immutable_under_mutation_storms() {
    let (dir, mut overlay) = setup();
    let content: Vec<u8> = (0..20000u32).map(|i| (i % 233) as u8).collect();
    seed(&dir, "f", &content);

    write_at(&mut overlay, "/f", 3, b"AAAA");
    overlay.truncate("/f", 12000).unwrap();
    write_at(&mut overlay, "/f", 11000, &[9u8; 5000]);
    overlay.rename("/f", "/g").unwrap();
    write_at(&mut overlay, "/g", 0, &[1u8; 100]);
    overlay.truncate("/g", 1).unwrap();

    assert_eq!(overlay.getattr("/.original/f").unwrap().size, 20000);
    assert_eq!(read_all(&overlay, "/.original/f"), content);
}

#[test]
fn sidecar_is_invisible_in_both_views() {
    let (_dir, overlay) = setup();

    assert!(!names(&overlay, "/").contains(&".cow".to_string()));
    assert!(!names(&overlay, "/.original").contains(&".cow".to_string()));
    assert_eq!(
        overlay.getattr("/.cow").unwrap_err().to_errno(),
        libc::ENOENT
    );
    assert_eq!(
        overlay.getattr("/.original/.cow").unwrap_err().to_errno(),
        libc::ENOENT
    );
}

#[test]
fn original_root_is_reachable_but_unlisted() {
    let (_dir, overlay) = setup();

    // not advertised in the working listing, but stat and readdir work
    assert!(!names(&overlay, "/").contains(&".original".to_string()));
    assert_eq!(
        overlay.getattr("/.original").unwrap().kind(),
        FileKind::Directory
    );
    overlay.opendir("/.original").unwrap();
}

#[test]
fn new_files_have_no_original_projection() {
    let (_dir, mut overlay) = setup();

    overlay.create("/n", 0o644).unwrap();
    overlay.mkdir("/nd", 0o755).unwrap();
    overlay.symlink("/n", "/ns").unwrap();

    for path in ["/.original/n", "/.original/nd", "/.original/ns"] {
        assert_eq!(
            overlay.getattr(path).unwrap_err().to_errno(),
            libc::ENOENT,
            "{path} must not exist in the original view"
        );
    }
    assert_eq!(names(&overlay, "/.original"), Vec::<String>::new());
    assert_eq!(names(&overlay, "/"), vec!["n", "nd", "ns"]);
}

#[test]
fn rename_target_is_hidden_from_original_view() {
    let (dir, mut overlay) = setup();
    seed(&dir, "x", b"data");

    overlay.rename("/x", "/y").unwrap();

    // /y exists live, but originally there was no /y
    assert_eq!(
        overlay.getattr("/.original/y").unwrap_err().to_errno(),
        libc::ENOENT
    );
    assert_eq!(overlay.getattr("/.original/x").unwrap().size, 4);
}

#[test]
fn renamed_directory_resolves_in_original_view() {
    let (dir, mut overlay) = setup();
    seed(&dir, "d/x", b"xx");

    overlay.rename("/d", "/e").unwrap();

    assert_eq!(
        overlay.getattr("/.original/d").unwrap().kind(),
        FileKind::Directory
    );
    assert_eq!(names(&overlay, "/.original/d"), vec!["x"]);
    assert_eq!(
        overlay.getattr("/.original/e").unwrap_err().to_errno(),
        libc::ENOENT
    );
}

#[test]
fn erased_file_keeps_its_stat_in_original_view() {
    let (dir, mut overlay) = setup();
    seed(&dir, "f", b"hello");
    let live_mode = overlay.getattr("/f").unwrap().mode;

    overlay.unlink("/f").unwrap();

    let st = overlay.getattr("/.original/f").unwrap();
    assert_eq!(st.kind(), FileKind::Regular);
    assert_eq!(st.mode, live_mode);
    assert_eq!(st.size, 5);
    assert!(st.mtime > 0);
}

#[test]
fn open_of_unobserved_original_path_is_enoent() {
    let (_dir, overlay) = setup();
    assert_eq!(
        overlay.open("/.original/ghost").unwrap_err().to_errno(),
        libc::ENOENT
    );
}

#[test]
fn reads_of_erased_file_come_entirely_from_the_journal() {
    let (dir, mut overlay) = setup();
    let content: Vec<u8> = (0..5000u32).map(|i| (i % 13) as u8).collect();
    seed(&dir, "f", &content);

    overlay.unlink("/f").unwrap();

    let handle = overlay.open("/.original/f").unwrap();
    assert_eq!(overlay.read(&handle, 0, 1 << 20).unwrap(), content);
    // offset reads inside and across the block boundary
    assert_eq!(
        overlay.read(&handle, 4090, 20).unwrap(),
        content[4090..4110].to_vec()
    );
    // short read at the original end of file
    assert_eq!(
        overlay.read(&handle, 4990, 100).unwrap(),
        content[4990..].to_vec()
    );
}

#[test]
fn working_view_reads_and_writes_roundtrip() {
    let (_dir, mut overlay) = setup();

    let mut handle = overlay.create("/f", 0o600).unwrap();
    overlay.write(&mut handle, 0, b"hello ").unwrap();
    overlay.write(&mut handle, 6, b"world").unwrap();
    overlay.fsync(&handle, false).unwrap();
    drop(handle);

    assert_eq!(read_all(&overlay, "/f"), b"hello world");
    assert_eq!(overlay.getattr("/f").unwrap().size, 11);
}

#[test]
fn working_symlink_roundtrip() {
    let (_dir, mut overlay) = setup();

    overlay.symlink("/target", "/link").unwrap();
    assert_eq!(overlay.readlink("/link").unwrap(), b"/target");
    assert_eq!(
        overlay.getattr("/link").unwrap().kind(),
        FileKind::Symlink
    );
}
