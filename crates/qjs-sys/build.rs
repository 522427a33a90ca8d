use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

// QuickJS release from bellard.org
// Update this when a new version is needed
const QUICKJS_VERSION: &str = "2024-01-13";

const SOURCES: &[&str] = &[
    "quickjs.c",
    "libregexp.c",
    "libunicode.c",
    "cutils.c",
    "libbf.c",
];

fn main() {
    println!("cargo:rerun-if-env-changed=QUICKJS_SRC_DIR");
    println!("cargo:rerun-if-env-changed=QUICKJS_SRC_URL");
    println!("cargo:rerun-if-env-changed=QUICKJS_VERSION");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap();
    let target_env = env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    if target_env == "msvc" {
        panic!("QuickJS does not build with MSVC; use a GNU toolchain");
    }

    let version = env::var("QUICKJS_VERSION").unwrap_or_else(|_| QUICKJS_VERSION.to_string());

    let src_dir = match env::var("QUICKJS_SRC_DIR") {
        Ok(dir) => {
            println!("cargo:warning=Using QuickJS sources from {}", dir);
            PathBuf::from(dir)
        }
        Err(_) => download_quickjs(&version),
    };

    compile_quickjs(&src_dir, &version);

    match target_os.as_str() {
        "linux" | "android" => {
            println!("cargo:rustc-link-lib=m");
            println!("cargo:rustc-link-lib=dl");
            println!("cargo:rustc-link-lib=pthread");
        }
        "freebsd" | "netbsd" | "openbsd" => {
            println!("cargo:rustc-link-lib=m");
            println!("cargo:rustc-link-lib=pthread");
        }
        _ => {}
    }

    println!("cargo:include={}", src_dir.display());
}

fn download_quickjs(version: &str) -> PathBuf {
    let cache_dir = get_cache_dir();
    let version_dir = cache_dir.join(version);

    // Check if already downloaded
    let marker = version_dir.join(".downloaded");
    if marker.exists() {
        if let Some(dir) = find_source_dir(&version_dir) {
            println!("cargo:warning=Using cached QuickJS from {}", dir.display());
            return dir;
        }
    }

    let url = env::var("QUICKJS_SRC_URL").unwrap_or_else(|_| {
        format!("https://bellard.org/quickjs/quickjs-{}.tar.xz", version)
    });

    println!("cargo:warning=Downloading QuickJS from {}", url);

    fs::create_dir_all(&version_dir).expect("Failed to create cache directory");

    let response = ureq::get(&url)
        .call()
        .unwrap_or_else(|e| panic!("Failed to download QuickJS: {}. URL: {}", e, url));

    // Stream straight into the decoder; the archive is small but there is no need to buffer it
    let reader = response.into_body().into_reader();
    let decoder: Box<dyn Read> = if url.ends_with(".tar.gz") || url.ends_with(".tgz") {
        Box::new(flate2::read::GzDecoder::new(reader))
    } else {
        Box::new(xz2::read::XzDecoder::new(reader))
    };
    let mut archive = tar::Archive::new(decoder);

    archive
        .unpack(&version_dir)
        .expect("Failed to extract QuickJS archive");

    fs::write(&marker, "").expect("Failed to create marker file");

    let dir = find_source_dir(&version_dir).unwrap_or_else(|| {
        panic!(
            "quickjs.c not found in extracted archive at {}",
            version_dir.display()
        )
    });

    println!("cargo:warning=QuickJS extracted to {}", dir.display());

    dir
}

fn compile_quickjs(src_dir: &Path, version: &str) {
    let mut build = cc::Build::new();
    build
        .warnings(false)
        .define("CONFIG_VERSION", format!("\"{}\"", version).as_str())
        .define("CONFIG_BIGNUM", None)
        .define("_GNU_SOURCE", None)
        .flag_if_supported("-Wno-implicit-fallthrough")
        .flag_if_supported("-Wno-sign-compare")
        .flag_if_supported("-Wno-enum-conversion");

    for file in SOURCES {
        let path = src_dir.join(file);
        if !path.exists() {
            panic!("Missing QuickJS source file: {}", path.display());
        }
        println!("cargo:rerun-if-changed={}", path.display());
        build.file(path);
    }

    build.include(src_dir);
    build.compile("quickjs");
}

fn find_source_dir(root: &Path) -> Option<PathBuf> {
    if root.join("quickjs.c").exists() {
        return Some(root.to_path_buf());
    }

    // Release archives extract to a versioned subdirectory
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && path.join("quickjs.c").exists() {
            return Some(path);
        }
    }

    None
}

fn get_cache_dir() -> PathBuf {
    // Try CARGO_HOME first, then fallback to home directory
    if let Ok(cargo_home) = env::var("CARGO_HOME") {
        return PathBuf::from(cargo_home).join("cache").join("quickjs");
    }

    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home)
            .join(".cargo")
            .join("cache")
            .join("quickjs");
    }

    if let Ok(userprofile) = env::var("USERPROFILE") {
        return PathBuf::from(userprofile)
            .join(".cargo")
            .join("cache")
            .join("quickjs");
    }

    // Fallback to OUT_DIR
    PathBuf::from(env::var("OUT_DIR").unwrap()).join("quickjs-cache")
}
