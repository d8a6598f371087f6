mod support;

use std::fs;

use diffharness_core::build::{BlobBuilder, BuildOptions, BuildOutcome};
use diffharness_core::catalog::{CatalogSignatures, FunctionCatalog};
use diffharness_core::config::Engine;
use diffharness_core::crafter::{AssembleError, DriverGenerator, HarnessAssembler};
use support::{module_defining, write_library, FakeToolchain, CATALOG};
use tempfile::{tempdir, TempDir};

fn build_blob(toolchain: &FakeToolchain) -> (TempDir, BuildOutcome, FunctionCatalog) {
    let dir = tempdir().expect("tempdir");
    let libs = vec![
        write_library(dir.path(), "A", "libA", &[("copy.c", module_defining(&["copy"]))]),
        write_library(dir.path(), "B", "libB", &[("copy.c", module_defining(&["copy"]))]),
        write_library(dir.path(), "X", "libX", &[("other.c", module_defining(&["other"]))]),
    ];
    let catalog = FunctionCatalog::from_json_str(CATALOG).expect("catalog");
    let options = BuildOptions { output: dir.path().join("blob.bc"), ..BuildOptions::default() };
    let outcome = BlobBuilder::new(&catalog, &libs, toolchain, &CatalogSignatures).run(&options).expect("build");
    (dir, outcome, catalog)
}

fn libs(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn symex_harness_links_driver_with_blob() {
    let toolchain = FakeToolchain::new();
    let (dir, outcome, catalog) = build_blob(&toolchain);
    let signature = catalog.signature_of("copy", &CatalogSignatures, None).expect("signature");
    let selected = libs(&["A", "B"]);
    let driver = DriverGenerator::new(&signature, &selected, Engine::Symex, 8)
        .with_headers(["string.h"])
        .generate()
        .expect("driver");

    let target_folder = dir.path().join("harness");
    let harness = HarnessAssembler::new(&toolchain, Engine::Symex)
        .assemble(&outcome.blob, &driver, &selected, "copy", &target_folder)
        .expect("assemble");

    assert_eq!(harness.target, target_folder.join("copy.bc"));
    assert_eq!(harness.driver_path, target_folder.join("copy_driver.c"));
    assert_eq!(harness.wrappers.len(), 2);
    let linked = fs::read_to_string(&harness.target).expect("harness text");
    assert!(linked.contains("@A_copy("));
    assert!(linked.contains("entry__B__copy(dst, src)"));
}

#[test]
fn library_without_the_function_is_an_unresolved_wrapper() {
    let toolchain = FakeToolchain::new();
    let (dir, outcome, catalog) = build_blob(&toolchain);
    assert!(!outcome.blob.complete);
    let signature = catalog.signature_of("copy", &CatalogSignatures, None).expect("signature");
    let selected = libs(&["A", "X"]);
    let driver = DriverGenerator::new(&signature, &selected, Engine::Symex, 8).generate().expect("driver");

    let err = HarnessAssembler::new(&toolchain, Engine::Symex)
        .assemble(&outcome.blob, &driver, &selected, "copy", &dir.path().join("harness"))
        .unwrap_err();

    match err {
        AssembleError::UnresolvedWrapper { library, function } => {
            assert_eq!(library, "X");
            assert_eq!(function, "copy");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dir.path().join("harness").join("copy.bc").exists());
}

#[test]
fn fuzzing_harness_writes_toolset() {
    let toolchain = FakeToolchain::new();
    let (dir, outcome, catalog) = build_blob(&toolchain);
    let signature = catalog.signature_of("copy", &CatalogSignatures, None).expect("signature");
    let selected = libs(&["A", "B"]);
    let driver = DriverGenerator::new(&signature, &selected, Engine::Fuzzing, 8).generate().expect("driver");
    assert!(!driver.testcases.is_empty());

    let target_folder = dir.path().join("fuzz");
    let harness = HarnessAssembler::new(&toolchain, Engine::Fuzzing)
        .assemble(&outcome.blob, &driver, &selected, "copy", &target_folder)
        .expect("assemble");

    assert_eq!(harness.target, target_folder.join("copy.afl"));
    assert!(harness.target.exists());
    assert!(target_folder.join("run.sh").exists());
    assert!(target_folder.join("findings").is_dir());
    let seeds = fs::read_dir(target_folder.join("testcases")).expect("testcases").count();
    assert_eq!(seeds, driver.testcases.len());
}
