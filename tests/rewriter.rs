use std::fs;

use standalone_archive::{
    backup_path, extract, substitute, substitute_all, ErrorKind, FieldKind, Matcher,
    ModuleIdentity, Outcome, Schema, SubstituteOptions,
};

mod common;
use common::*;

fn matcher() -> Matcher {
    Matcher::marker(MARKER)
}

#[test]
fn plain_script() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "cli.js", MAIN_JS);

    let extracted = extract(&path, &matcher()).unwrap();
    assert_eq!(extracted.payload, MAIN_JS);
    assert_eq!(extracted.field, FieldKind::Contents);
    assert_eq!(
        extracted.module,
        ModuleIdentity {
            index: 0,
            name: b"cli.js".to_vec(),
        }
    );

    let payload = b"// __APP_MAIN__\nconsole.log('patched');\n";
    let outcome = substitute(
        &path,
        &extracted.module,
        extracted.field,
        payload,
        &SubstituteOptions::default(),
    )
    .unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.format, None);
    assert_eq!(report.file_len, payload.len() as u64);
    assert_eq!(fs::read(&path).unwrap(), payload);

    // Only the contents of a script can be replaced.
    assert_kind(
        substitute(
            &path,
            &extracted.module,
            FieldKind::SourceMap,
            b"{}",
            &SubstituteOptions::default(),
        ),
        ErrorKind::NotFound,
    );
}

#[test]
fn plain_script_selection() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "cli.js", UTIL_JS);
    assert_kind(extract(&path, &matcher()), ErrorKind::NotFound);

    // The file name can select a script that lacks the marker.
    let matcher = matcher().with_name_pattern(b"cli.js".to_vec());
    assert_eq!(extract(&path, &matcher).unwrap().payload, UTIL_JS);
}

#[test]
fn unchanged_script() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "cli.js", MAIN_JS);
    let extracted = extract(&path, &matcher()).unwrap();

    let mut options = SubstituteOptions::default();
    options.backup = true;
    let outcome = substitute(&path, &extracted.module, extracted.field, MAIN_JS, &options).unwrap();
    assert!(outcome.is_unchanged());
    assert!(outcome.report().is_none());
    assert!(!backup_path(&path, &options.backup_suffix).exists());
}

#[test]
fn backup_is_never_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let original = elf(&archive(Schema::V2));
    let path = write_file(dir.path(), "app", &original);
    let extracted = extract(&path, &matcher()).unwrap();

    let mut options = SubstituteOptions::default();
    options.backup = true;
    let backup = backup_path(&path, &options.backup_suffix);
    assert_eq!(backup, dir.path().join("app.backup"));

    substitute(&path, &extracted.module, extracted.field, b"// __APP_MAIN__ 1", &options).unwrap();
    assert_eq!(fs::read(&backup).unwrap(), original);
    let first = fs::read(&path).unwrap();

    substitute(&path, &extracted.module, extracted.field, b"// __APP_MAIN__ 2", &options).unwrap();
    assert_eq!(fs::read(&backup).unwrap(), original);
    assert_ne!(fs::read(&path).unwrap(), first);
}

#[test]
fn output_path() {
    let dir = tempfile::tempdir().unwrap();
    let original = elf(&archive(Schema::V2));
    let path = write_file(dir.path(), "app", &original);
    let output = dir.path().join("app.patched");
    let extracted = extract(&path, &matcher()).unwrap();

    let mut options = SubstituteOptions::default();
    options.output = Some(output.clone());
    options.backup = true;
    substitute(&path, &extracted.module, extracted.field, b"// __APP_MAIN__ out", &options)
        .unwrap();
    assert_eq!(fs::read(&path).unwrap(), original);
    // The input is untouched, so it is not copied.
    assert!(!backup_path(&path, &options.backup_suffix).exists());
    assert_eq!(
        extract(&output, &matcher()).unwrap().payload,
        b"// __APP_MAIN__ out"
    );
}

#[cfg(unix)]
#[test]
fn permissions_preserved() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app", &elf(&archive(Schema::V2)));
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    let extracted = extract(&path, &matcher()).unwrap();

    substitute(
        &path,
        &extracted.module,
        extracted.field,
        b"// __APP_MAIN__ exec",
        &SubstituteOptions::default(),
    )
    .unwrap();
    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[cfg(unix)]
#[test]
fn backup_is_complete() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let original = elf(&archive(Schema::V2));
    let path = write_file(dir.path(), "app", &original);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o750)).unwrap();
    let extracted = extract(&path, &matcher()).unwrap();

    let mut options = SubstituteOptions::default();
    options.backup = true;
    substitute(&path, &extracted.module, extracted.field, b"// __APP_MAIN__ 1", &options).unwrap();

    let backup = backup_path(&path, &options.backup_suffix);
    assert_eq!(fs::read(&backup).unwrap(), original);
    let mode = fs::metadata(&backup).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o750);

    // No temporary files are left behind.
    let mut names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, ["app", "app.backup"]);
}

#[test]
fn identity_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app", &elf(&archive(Schema::V2)));

    // A stale index is resolved by name.
    let module = ModuleIdentity {
        index: 7,
        name: b"/$bunfs/root/data.json".to_vec(),
    };
    substitute(
        &path,
        &module,
        FieldKind::Contents,
        b"{\"data\":false}",
        &SubstituteOptions::default(),
    )
    .unwrap();
    let matcher = Matcher::default().with_name_pattern(b"data.json".to_vec());
    let extracted = extract(&path, &matcher).unwrap();
    assert_eq!(extracted.module.index, 2);
    assert_eq!(extracted.payload, b"{\"data\":false}");

    let module = ModuleIdentity {
        index: 0,
        name: b"/$bunfs/root/missing.js".to_vec(),
    };
    assert_kind(
        substitute(
            &path,
            &module,
            FieldKind::Contents,
            b"",
            &SubstituteOptions::default(),
        ),
        ErrorKind::NotFound,
    );
}

#[test]
fn extended_fields() {
    let dir = tempfile::tempdir().unwrap();
    let v1 = write_file(dir.path(), "v1", &elf(&archive(Schema::V1)));
    let v2 = write_file(dir.path(), "v2", &elf(&archive(Schema::V2)));
    let module = ModuleIdentity {
        index: 1,
        name: b"/$bunfs/root/main.js".to_vec(),
    };

    assert_kind(
        substitute(
            &v1,
            &module,
            FieldKind::ModuleInfo,
            b"info",
            &SubstituteOptions::default(),
        ),
        ErrorKind::Malformed,
    );
    substitute(
        &v2,
        &module,
        FieldKind::ModuleInfo,
        b"info",
        &SubstituteOptions::default(),
    )
    .unwrap();
    // The contents are unaffected.
    assert_eq!(extract(&v2, &matcher()).unwrap().payload, MAIN_JS);
}

#[test]
fn batch_is_independent() {
    let dir = tempfile::tempdir().unwrap();
    let elf_path = write_file(dir.path(), "linux", &elf(&archive(Schema::V2)));
    let missing = dir.path().join("missing");
    let unrelated = write_file(dir.path(), "unrelated.js", UTIL_JS);
    let macho_path = write_file(dir.path(), "macos", &macho(&archive(Schema::V1), 2048));
    let script = write_file(dir.path(), "cli.js", MAIN_JS);

    let hook = RecordingHook::default();
    let mut options = SubstituteOptions::default();
    options.resign_hook = Some(Box::new(hook.clone()));
    let payload = b"// __APP_MAIN__ batch\n";
    let paths = [&elf_path, &missing, &unrelated, &macho_path, &script];
    let results = substitute_all(paths, &matcher(), payload, &options);
    assert_eq!(results.len(), 5);

    assert!(matches!(results[0], Ok(Outcome::Written(_))));
    match &results[1] {
        Err(e) => assert!(matches!(e.kind(), ErrorKind::Io(_))),
        Ok(outcome) => panic!("unexpected {:?}", outcome),
    }
    match &results[2] {
        Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
        Ok(outcome) => panic!("unexpected {:?}", outcome),
    }
    assert!(matches!(results[3], Ok(Outcome::Written(_))));
    assert!(matches!(results[4], Ok(Outcome::Written(_))));

    for path in [&elf_path, &macho_path, &script] {
        assert_eq!(extract(path, &matcher()).unwrap().payload, payload);
    }
    assert_eq!(fs::read(&unrelated).unwrap(), UTIL_JS);
    assert_eq!(hook.calls(), vec![macho_path.clone()]);

    // Running again finds everything up to date.
    let results = substitute_all([&elf_path, &macho_path, &script], &matcher(), payload, &options);
    assert!(results
        .iter()
        .all(|result| matches!(result, Ok(Outcome::Unchanged))));
}
