//! End-to-end scans over bundle trees built in temporary directories.
//!
//! Most tests use [`MarkerInspector`], which decides matches from file
//! contents, so the scoping rules are checked independently of Mach-O
//! parsing. The last tests go through the real Mach-O inspector.

use fairscan::{
    find_encrypted_binaries, BinaryInspector, BundleScanner, Error, Inspection, Report,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `ENC:<n>` files match with info `n`, `BIN` files are executables
/// without encryption metadata, anything else fails to parse.
struct MarkerInspector;

impl BinaryInspector for MarkerInspector {
    type Info = u32;

    fn inspect(&self, path: &Path) -> fairscan::Result<Inspection<u32>> {
        let data = fs::read_to_string(path).unwrap_or_default();
        if let Some(id) = data.strip_prefix("ENC:") {
            let id = id.trim().parse().map_err(|_| Error::MachO("bad marker".into()))?;
            return Ok(Inspection {
                is_executable: true,
                encryption: Some(id),
            });
        }
        if data == "BIN" {
            return Ok(Inspection {
                is_executable: true,
                encryption: None,
            });
        }
        Err(Error::MachO("not a binary".into()))
    }
}

fn write(root: &Path, rel: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn info_plist(executable: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <plist version=\"1.0\"><dict>\
         <key>CFBundleExecutable</key><string>{executable}</string>\
         </dict></plist>"
    )
}

/// Platform-native report key for a `/`-separated relative path.
fn key(rel: &str) -> String {
    rel.split('/').collect::<PathBuf>().to_string_lossy().into_owned()
}

fn scan(root: &Path) -> fairscan::Result<Report<u32>> {
    BundleScanner::new(root).inspector(MarkerInspector).scan()
}

fn new_bundle() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("App.app");
    fs::create_dir(&root).unwrap();
    (temp, root)
}

#[test]
fn macos_bundle_reports_helper_under_main_executable() {
    let (_temp, root) = new_bundle();
    write(&root, "Contents/Info.plist", info_plist("App"));
    write(&root, "Contents/MacOS/App", "ENC:1");
    write(&root, "Contents/Frameworks/Helper.dylib", "ENC:2");
    write(&root, "Contents/Resources/icon.icns", "icon");
    write(&root, "Contents/PlugIns/Ext.appex/Contents/Info.plist", info_plist("Ext"));
    write(&root, "Contents/PlugIns/Ext.appex/Contents/MacOS/Ext", "BIN");

    let report = scan(&root).unwrap();

    assert_eq!(report.len(), 1);
    let files = &report[&key("Contents/MacOS/App")];
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, key("Contents/Frameworks/Helper.dylib"));
    assert_eq!(files[0].info, 2);
}

#[test]
fn missing_manifest_fails_scan() {
    let (_temp, root) = new_bundle();
    write(&root, "App", "ENC:1");
    write(&root, "Frameworks/Lib.dylib", "ENC:2");

    let err = scan(&root).unwrap_err();
    match err {
        Error::Manifest { path, .. } => assert!(path.starts_with(&root)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn macos_plugin_needs_its_own_manifest() {
    let (_temp, root) = new_bundle();
    write(&root, "Contents/Info.plist", info_plist("App"));
    write(&root, "Contents/MacOS/App", "ENC:1");
    write(&root, "Contents/PlugIns/Ext.appex/Contents/MacOS/Ext", "ENC:2");

    let err = scan(&root).unwrap_err();
    match err {
        Error::Manifest { path, .. } => {
            assert!(path.starts_with(root.join("Contents").join("PlugIns").join("Ext.appex")))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_manifest_without_matches_is_fine() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "ENC:1");
    // Plugin without manifest, but also without matches.
    write(&root, "PlugIns/Quiet.appex/Quiet", "BIN");

    let report = scan(&root).unwrap();
    assert_eq!(report.keys().cloned().collect::<Vec<_>>(), vec![key("App")]);
}

#[test]
fn malformed_manifest_fails_scan() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", "<?xml version=\"1.0\"?><plist><dict><key>CFBundleExecutable");
    write(&root, "App", "ENC:1");

    assert!(matches!(scan(&root), Err(Error::Plist { .. })));
}

#[test]
fn main_executable_is_never_self_reported() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "ENC:1");
    write(&root, "Frameworks/A.framework/A", "ENC:2");
    write(&root, "Frameworks/B.framework/B", "ENC:3");
    write(&root, "libC.dylib", "ENC:4");

    let report = scan(&root).unwrap();
    let files = &report[&key("App")];

    // Four matches including the main executable.
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|f| f.path != key("App")));
}

#[test]
fn scope_with_only_main_executable_has_empty_list() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "ENC:1");

    let report = scan(&root).unwrap();
    assert!(report[&key("App")].is_empty());
}

#[test]
fn plugin_files_belong_to_plugin_scope() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "BIN");
    write(&root, "PlugIns/Share.appex/Info.plist", info_plist("Share"));
    write(&root, "PlugIns/Share.appex/Share", "ENC:1");
    write(&root, "PlugIns/Share.appex/Frameworks/Lib.dylib", "ENC:2");
    write(&root, "PlugIns/Share.appex/PlugIns/Inner.appex/Info.plist", info_plist("Inner"));
    write(&root, "PlugIns/Share.appex/PlugIns/Inner.appex/Inner", "ENC:3");
    write(&root, "PlugIns/Share.appex/PlugIns/Inner.appex/libInner.dylib", "ENC:4");

    let report = scan(&root).unwrap();

    // The root scope has no matches and so no key.
    assert_eq!(report.len(), 2);
    assert!(!report.contains_key(&key("App")));

    let share = &report[&key("PlugIns/Share.appex/Share")];
    assert_eq!(share.len(), 1);
    assert_eq!(share[0].path, key("PlugIns/Share.appex/Frameworks/Lib.dylib"));

    let inner = &report[&key("PlugIns/Share.appex/PlugIns/Inner.appex/Inner")];
    assert_eq!(inner.len(), 1);
    assert_eq!(
        inner[0].path,
        key("PlugIns/Share.appex/PlugIns/Inner.appex/libInner.dylib")
    );
}

#[test]
fn plugins_without_suffix_contribute_nothing() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "BIN");
    write(&root, "PlugIns/Loose.dylib", "ENC:1");
    write(&root, "PlugIns/Other.bundle/Other", "ENC:2");
    write(&root, "PlugIns/Other.bundle/Info.plist", info_plist("Other"));
    write(&root, "PlugIns/File.appex", "ENC:3");

    let report = scan(&root).unwrap();
    assert!(report.is_empty());
}

#[test]
fn custom_plugin_suffix() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "BIN");
    write(&root, "PlugIns/Other.bundle/Info.plist", info_plist("Other"));
    write(&root, "PlugIns/Other.bundle/Other", "ENC:1");
    write(&root, "PlugIns/Other.bundle/libX.dylib", "ENC:2");

    let report = BundleScanner::new(&root)
        .inspector(MarkerInspector)
        .plugin_suffixes([".appex", ".bundle"])
        .scan()
        .unwrap();

    let files = &report[&key("PlugIns/Other.bundle/Other")];
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].info, 2);
}

#[test]
fn within_scope_order_follows_walk() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "ENC:0");
    write(&root, "b/lib2.dylib", "ENC:3");
    write(&root, "a/z.dylib", "ENC:2");
    write(&root, "a/a.dylib", "ENC:1");
    write(&root, "c.dylib", "ENC:4");

    let report = scan(&root).unwrap();
    let order: Vec<u32> = report[&key("App")].iter().map(|f| f.info).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
}

#[test]
fn parallel_scan_matches_serial_scan() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "ENC:0");
    for i in 1..40u32 {
        write(&root, &format!("Frameworks/F{i:02}.framework/F{i:02}"), format!("ENC:{i}"));
        write(&root, &format!("Frameworks/F{i:02}.framework/Info.plist"), "plist");
    }
    write(&root, "PlugIns/Ext.appex/Info.plist", info_plist("Ext"));
    write(&root, "PlugIns/Ext.appex/Ext", "ENC:100");
    write(&root, "PlugIns/Ext.appex/libExt.dylib", "ENC:101");

    let serial = scan(&root).unwrap();
    let parallel = BundleScanner::new(&root)
        .inspector(MarkerInspector)
        .parallel(true)
        .scan()
        .unwrap();

    assert_eq!(serial, parallel);
    assert_eq!(serial[&key("App")].len(), 39);
}

#[test]
fn lazy_matches_are_in_walk_order() {
    let (_temp, root) = new_bundle();
    write(&root, "App", "ENC:1");
    write(&root, "PlugIns/Ext.appex/Ext", "ENC:2");
    write(&root, "Resources/notes.txt", "text");
    write(&root, "Zeta.dylib", "ENC:3");

    let scanner = BundleScanner::new(&root).inspector(MarkerInspector);
    let matches: Vec<_> = scanner
        .matches()
        .unwrap()
        .map(|m| m.unwrap())
        .map(|m| (m.scope, m.info))
        .collect();

    assert_eq!(
        matches,
        vec![
            (root.clone(), 1),
            (root.join("PlugIns").join("Ext.appex"), 2),
            (root.clone(), 3),
        ]
    );
}

#[test]
fn scan_root_must_be_directory() {
    let (_temp, root) = new_bundle();
    write(&root, "App", "ENC:1");

    assert!(matches!(scan(&root.join("App")), Err(Error::NotADirectory(_))));
    assert!(matches!(scan(&root.join("Missing.app")), Err(Error::Io { .. })));
}

#[test]
#[cfg(unix)]
fn symlink_loop_fails_scan() {
    use std::os::unix::fs::symlink;

    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "Frameworks/Lib.dylib", "ENC:1");
    symlink("..", root.join("Frameworks/Up")).unwrap();

    assert!(matches!(scan(&root), Err(Error::Walk(_))));
}

#[test]
fn dot_slash_executable_name_is_normalized() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("./App"));
    write(&root, "App", "ENC:1");
    write(&root, "lib.dylib", "ENC:2");

    let report = scan(&root).unwrap();

    assert_eq!(report.keys().cloned().collect::<Vec<_>>(), vec![key("App")]);
    let files = &report[&key("App")];
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, key("lib.dylib"));
}

#[test]
fn escaping_executable_name_fails_scan() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("../App"));
    write(&root, "App", "ENC:1");

    assert!(matches!(scan(&root), Err(Error::Manifest { .. })));
}

/// Strip all permissions from `dir`. Returns false when the directory is
/// still readable afterwards (running as root).
#[cfg(unix)]
fn make_unreadable(dir: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(dir, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(dir).is_ok() {
        restore_permissions(dir);
        return false;
    }
    true
}

#[cfg(unix)]
fn restore_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
#[cfg(unix)]
fn unreadable_plugins_dir_contributes_nothing() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "ENC:1");
    write(&root, "lib.dylib", "ENC:2");
    write(&root, "PlugIns/Ext.appex/Info.plist", info_plist("Ext"));
    write(&root, "PlugIns/Ext.appex/Ext", "ENC:3");
    write(&root, "PlugIns/Ext.appex/libExt.dylib", "ENC:4");

    let plugins = root.join("PlugIns");
    if !make_unreadable(&plugins) {
        return;
    }
    let result = scan(&root);
    restore_permissions(&plugins);

    let report = result.unwrap();
    assert_eq!(report.keys().cloned().collect::<Vec<_>>(), vec![key("App")]);
    assert_eq!(report[&key("App")].len(), 1);
}

#[test]
#[cfg(unix)]
fn unreadable_ordinary_dir_fails_scan() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", "ENC:1");
    write(&root, "Frameworks/Lib.dylib", "ENC:2");

    let frameworks = root.join("Frameworks");
    if !make_unreadable(&frameworks) {
        return;
    }
    let result = scan(&root);
    restore_permissions(&frameworks);

    assert!(matches!(result, Err(Error::Walk(_))));
}

// Real Mach-O inspection.

const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_EXECUTE: u32 = 0x2;
const MH_DYLIB: u32 = 0x6;
const CPU_TYPE_ARM64: u32 = 0x0100_000c;
const LC_ENCRYPTION_INFO_64: u32 = 0x2c;

fn macho(filetype: u32, cryptid: Option<u32>) -> Vec<u8> {
    let (ncmds, sizeofcmds) = if cryptid.is_some() { (1u32, 24u32) } else { (0, 0) };
    let mut out = Vec::new();
    for word in [MH_MAGIC_64, CPU_TYPE_ARM64, 0, filetype, ncmds, sizeofcmds, 0, 0] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    if let Some(id) = cryptid {
        for word in [LC_ENCRYPTION_INFO_64, 24, 0x4000, 0x10000, id, 0] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
    out
}

#[test]
fn ios_bundle_with_real_macho_files() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", macho(MH_EXECUTE, Some(1)));
    write(&root, "Frameworks/Crypt.framework/Crypt", macho(MH_DYLIB, Some(1)));
    write(&root, "Frameworks/Plain.framework/Plain", macho(MH_DYLIB, None));
    write(&root, "Assets.car", b"not a mach-o at all");
    write(&root, "truncated", &macho(MH_DYLIB, Some(1))[..20]);
    write(&root, "PlugIns/Widget.appex/Info.plist", info_plist("Widget"));
    write(&root, "PlugIns/Widget.appex/Widget", macho(MH_EXECUTE, Some(1)));

    let report = find_encrypted_binaries(&root).unwrap();

    assert_eq!(report.len(), 2);
    let files = &report[&key("App")];
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, key("Frameworks/Crypt.framework/Crypt"));
    assert_eq!(files[0].info.cryptid, 1);
    assert_eq!(files[0].info.cryptsize, 0x10000);

    assert!(report[&key("PlugIns/Widget.appex/Widget")].is_empty());
}

#[test]
fn report_serializes_to_json() {
    let (_temp, root) = new_bundle();
    write(&root, "Info.plist", info_plist("App"));
    write(&root, "App", macho(MH_EXECUTE, Some(1)));
    write(&root, "libA.dylib", macho(MH_DYLIB, Some(0)));

    let report = find_encrypted_binaries(&root).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["App"][0]["path"], "libA.dylib");
    assert_eq!(json["App"][0]["info"]["cryptid"], 0);
    assert_eq!(json["App"][0]["info"]["is_64"], true);
}
