mod support;

use std::fs;
use std::path::Path;

use diffharness_core::build::{BlobBuilder, BuildOptions};
use diffharness_core::catalog::CatalogSignatures;
use diffharness_core::config::{BuilderConfig, LibraryConfig, LIBRARY_CONFIG_FILE};
use support::{module_defining, FakeToolchain};
use tempfile::tempdir;

fn introduce(root: &Path, id: &str, functions: &[&str]) {
    let src = root.join("src").join("string");
    fs::create_dir_all(&src).expect("source dir");
    for f in functions {
        fs::write(src.join(format!("{f}.c")), module_defining(&[f])).expect("source");
    }
    let config = LibraryConfig {
        name: id.to_string(),
        directory: "src".to_string(),
        compiler_flags: "-O0".to_string(),
        traversals: vec!["string".to_string()],
        target: format!("{id}.bc"),
        ..LibraryConfig::template()
    };
    fs::write(root.join(LIBRARY_CONFIG_FILE), serde_json::to_string_pretty(&config).expect("json"))
        .expect("library config");
}

#[test]
fn builder_config_drives_a_full_build() {
    let dir = tempdir().expect("tempdir");
    introduce(&dir.path().join("libs/musl"), "musl", &["copy", "length"]);
    introduce(&dir.path().join("libs/diet"), "diet", &["copy"]);
    let config_path = dir.path().join("builder.yaml");
    fs::write(
        &config_path,
        r#"libs:
  - libs/musl
  - libs/diet
functions:
  copy:
    headers: [string.h]
    signature: "char *copy(char *dst, const char *src);"
  length:
    headers: [string.h]
    signature: "int length(const char *s);"
output: out/blob.bc
"#,
    )
    .expect("builder config");

    let loaded = BuilderConfig::load(&config_path).expect("load builder config");
    let catalog = loaded.catalog().expect("catalog");
    let libraries = loaded.libraries().expect("libraries");
    assert_eq!(libraries.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["musl", "diet"]);
    assert_eq!(libraries[0].build_dir, dir.path().join("libs/musl/src-build"));

    let toolchain = FakeToolchain::new();
    let options = BuildOptions { output: loaded.output_path(), ..BuildOptions::default() };
    let outcome = BlobBuilder::new(&catalog, &libraries, &toolchain, &CatalogSignatures)
        .run(&options)
        .expect("build");

    assert_eq!(outcome.blob.path, dir.path().join("out/blob.bc"));
    assert!(outcome.report.contains("diet", "length"));
    assert_eq!(outcome.report.len(), 1);
    assert!(outcome.blob.has_wrapper("entry__musl__length"));
    assert!(libraries[0].target.exists());
    assert!(libraries[1].rename_mapping_path().exists());
    assert_eq!(
        outcome.report.to_string(),
        "Integrity check: 1 gap(s)\n- diet:length (symbol_not_found)\n"
    );
}
