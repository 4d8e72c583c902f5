use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;

macro_rules! cargo_run {
    ($($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin("imembed")?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[test]
fn add_list_search_get() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let images = assert_fs::TempDir::new()?;
    let apple = images.child("apple.jpg");
    apple.write_str("red apple fruit")?;
    let car = images.child("car.png");
    car.write_str("blue fast car")?;

    cargo_run!("-c", conf_dir.path(), "add", apple.path(), "-d", "a red apple")
        .success()
        .stdout(predicate::str::starts_with("1\tapple.jpg"));
    cargo_run!("-c", conf_dir.path(), "add", car.path()).success();

    cargo_run!("-c", conf_dir.path(), "list").success().stdout(
        predicate::str::contains("1\tapple.jpg\ta red apple")
            .and(predicate::str::contains("2\tcar.png\tNo description provided.")),
    );

    cargo_run!("-c", conf_dir.path(), "search", "red apple", "-k", "1")
        .success()
        .stdout(predicate::str::contains("apple.jpg").and(predicate::str::contains("car.png").not()));

    let out = conf_dir.child("out.jpg");
    cargo_run!("-c", conf_dir.path(), "get", "1", "-o", out.path()).success();
    out.assert("red apple fruit");

    cargo_run!("-c", conf_dir.path(), "get", "7").failure();

    Ok(())
}

#[test]
fn add_directory_then_remove() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let images = assert_fs::TempDir::new()?;
    images.child("a.jpg").write_str("green leaf")?;
    images.child("nested/b.png").write_str("yellow sun")?;
    images.child("notes.txt").write_str("not an image")?;

    cargo_run!("-c", conf_dir.path(), "add", images.path()).success();
    cargo_run!("-c", conf_dir.path(), "list", "-o", "json")
        .success()
        .stdout(
            predicate::str::contains("a.jpg")
                .and(predicate::str::contains("b.png"))
                .and(predicate::str::contains("notes.txt").not()),
        );

    cargo_run!("-c", conf_dir.path(), "stats").success().stdout(predicate::str::contains("\"images\": 2"));

    cargo_run!("-c", conf_dir.path(), "remove", "1").success();
    cargo_run!("-c", conf_dir.path(), "remove", "1").failure();
    cargo_run!("-c", conf_dir.path(), "stats").success().stdout(predicate::str::contains("\"images\": 1"));

    cargo_run!("-c", conf_dir.path(), "check").success().stdout(predicate::str::contains("\"orphan_vectors\": []"));

    Ok(())
}

#[test]
fn search_with_hnsw_index() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let image = conf_dir.child("tree.webp");
    image.write_str("tall oak tree")?;

    cargo_run!("-c", conf_dir.path(), "--index", "hnsw", "add", image.path()).success();
    cargo_run!("-c", conf_dir.path(), "--index", "hnsw", "search", "oak", "-o", "json")
        .success()
        .stdout(predicate::str::contains("\"filename\": \"tree.webp\"").and(predicate::str::contains("similarity")));

    Ok(())
}
