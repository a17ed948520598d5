//! Build script for mpibind
//!
//! Locates the native MPI installation, compiles the constant shim
//! (`csrc/mpibind.c`) against its headers and links the MPI library.
//! The ABI (handle width and `MPI_Status` layout) is chosen by the `openmpi`
//! cargo feature; a mismatch with the detected installation is reported as a
//! build warning.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=csrc/mpibind.c");
    println!("cargo:rerun-if-changed=csrc/mpibind.h");
    println!("cargo:rerun-if-env-changed=MPI_PKG_CONFIG");
    println!("cargo:rerun-if-env-changed=MPICC");
    println!("cargo:rerun-if-env-changed=CRAY_MPICH_DIR");

    let install = locate_mpi();

    let mut build = cc::Build::new();
    build
        .file("csrc/mpibind.c")
        .include("csrc")
        .warnings(true)
        .extra_warnings(true);
    for path in &install.include_paths {
        build.include(path);
    }
    if env::var("PROFILE").unwrap_or_default() == "release" {
        build.opt_level(3);
    }
    build.compile("mpibind");

    for path in &install.link_paths {
        println!("cargo:rustc-link-search=native={}", path.display());
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", path.display());
    }
    for lib in &install.libs {
        println!("cargo:rustc-link-lib={lib}");
    }

    check_abi_feature(&install);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vendor {
    Mpich,
    OpenMpi,
    Unknown,
}

struct MpiInstall {
    include_paths: Vec<PathBuf>,
    link_paths: Vec<PathBuf>,
    libs: Vec<String>,
    vendor: Vendor,
}

fn locate_mpi() -> MpiInstall {
    if let Ok(pkg_name) = env::var("MPI_PKG_CONFIG") {
        if let Ok(install) = probe_pkg_config(&pkg_name) {
            eprintln!("mpibind: using MPI from MPI_PKG_CONFIG={pkg_name}");
            return install;
        }
    }

    for pkg_name in ["mpich", "ompi", "mpi"] {
        if let Ok(install) = probe_pkg_config(pkg_name) {
            eprintln!("mpibind: using MPI from pkg-config package {pkg_name}");
            return install;
        }
    }

    if let Ok(install) = probe_mpicc() {
        eprintln!("mpibind: using MPI from the compiler wrapper");
        return install;
    }

    if let Ok(dir) = env::var("CRAY_MPICH_DIR") {
        eprintln!("mpibind: using Cray MPICH at {dir}");
        return MpiInstall {
            include_paths: vec![PathBuf::from(format!("{dir}/include"))],
            link_paths: vec![PathBuf::from(format!("{dir}/lib"))],
            libs: vec!["mpi".to_string()],
            vendor: Vendor::Mpich,
        };
    }

    for prefix in ["/usr", "/usr/local", "/opt/mpich", "/opt/openmpi"] {
        let include = PathBuf::from(format!("{prefix}/include"));
        if include.join("mpi.h").exists() {
            eprintln!("mpibind: using MPI headers under {prefix}");
            let vendor = vendor_from_header(&include);
            return MpiInstall {
                include_paths: vec![include],
                link_paths: vec![PathBuf::from(format!("{prefix}/lib"))],
                libs: vec!["mpi".to_string()],
                vendor,
            };
        }
    }

    panic!(
        "Could not find an MPI installation. Either:\n\
         - set MPI_PKG_CONFIG to the pkg-config package name (e.g. 'mpich' or 'ompi')\n\
         - put 'mpicc' on PATH (or set MPICC)\n\
         - set CRAY_MPICH_DIR on Cray systems"
    );
}

fn probe_pkg_config(name: &str) -> Result<MpiInstall, pkg_config::Error> {
    let lib = pkg_config::Config::new()
        .cargo_metadata(false)
        .probe(name)?;

    let vendor = if name.contains("ompi") {
        Vendor::OpenMpi
    } else if name.contains("mpich") {
        Vendor::Mpich
    } else {
        lib.include_paths
            .iter()
            .map(|p| vendor_from_header(p))
            .find(|v| *v != Vendor::Unknown)
            .unwrap_or(Vendor::Unknown)
    };

    Ok(MpiInstall {
        include_paths: lib.include_paths,
        link_paths: lib.link_paths,
        libs: lib.libs,
        vendor,
    })
}

fn probe_mpicc() -> Result<MpiInstall, String> {
    let mpicc = env::var("MPICC").unwrap_or_else(|_| "mpicc".to_string());

    // MPICH spells it `-show`, Open MPI `-showme`.
    for flag in ["-show", "-showme"] {
        let Ok(output) = Command::new(&mpicc).arg(flag).output() else {
            continue;
        };
        if output.status.success() {
            let line = String::from_utf8_lossy(&output.stdout);
            let vendor = if flag == "-showme" {
                Vendor::OpenMpi
            } else {
                Vendor::Mpich
            };
            return Ok(parse_compiler_line(&line, vendor));
        }
    }

    Err(format!("'{mpicc}' did not report its compile line"))
}

fn parse_compiler_line(line: &str, vendor: Vendor) -> MpiInstall {
    let mut include_paths = Vec::new();
    let mut link_paths = Vec::new();
    let mut libs = Vec::new();

    for part in line.split_whitespace() {
        if let Some(path) = part.strip_prefix("-I") {
            include_paths.push(PathBuf::from(path));
        } else if let Some(path) = part.strip_prefix("-L") {
            link_paths.push(PathBuf::from(path));
        } else if let Some(lib) = part.strip_prefix("-l") {
            libs.push(lib.to_string());
        }
    }

    if libs.is_empty() {
        libs.push("mpi".to_string());
    }

    let vendor = include_paths
        .iter()
        .map(|p| vendor_from_header(p))
        .find(|v| *v != Vendor::Unknown)
        .unwrap_or(vendor);

    MpiInstall {
        include_paths,
        link_paths,
        libs,
        vendor,
    }
}

fn vendor_from_header(include_dir: &Path) -> Vendor {
    match std::fs::read_to_string(include_dir.join("mpi.h")) {
        Ok(header) if header.contains("OPEN_MPI") => Vendor::OpenMpi,
        Ok(header) if header.contains("MPICH") => Vendor::Mpich,
        _ => Vendor::Unknown,
    }
}

fn check_abi_feature(install: &MpiInstall) {
    let openmpi_abi = env::var_os("CARGO_FEATURE_OPENMPI").is_some();
    match (install.vendor, openmpi_abi) {
        (Vendor::OpenMpi, false) => println!(
            "cargo:warning=detected Open MPI but the `openmpi` feature is disabled; \
             handle and status layouts will not match"
        ),
        (Vendor::Mpich, true) => println!(
            "cargo:warning=detected an MPICH-family MPI but the `openmpi` feature is enabled; \
             handle and status layouts will not match"
        ),
        _ => {}
    }
}
