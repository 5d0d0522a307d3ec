//! End-to-end decoding tests over real tarballs built from fixtures.
//!
//! Fixture trees live under `tests/fixtures/`; archives are built the way a
//! registry push would, with entry names relative to the fixtures directory
//! (e.g. `manifests/etcd/0.6.1/etcdcluster.crd.yaml`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use appr_bundle::{
    classify, ArchiveReader, Artifact, DecoderConfig, ErrorKind, ManifestDecoder,
    RegistryCoordinates, Stage, TarArchiveReader,
};
use flate2::write::GzEncoder;
use flate2::Compression;

const ETCD: &str = "manifests/etcd";
const PROMETHEUS: &str = "manifests/prometheus";
const DESCHEDULER: &str = "flattened/descheduler-bundle.yaml";

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Tar `src` (a file or directory under the fixtures dir), naming entries
/// relative to the fixtures dir. Directory listings are sorted.
fn tarball(src: &str) -> Vec<u8> {
    let base = fixtures();
    let mut builder = tar::Builder::new(Vec::new());
    append_tree(&mut builder, &base, &base.join(src));
    builder.into_inner().expect("finish tar")
}

fn append_tree(builder: &mut tar::Builder<Vec<u8>>, base: &Path, path: &Path) {
    let name = path.strip_prefix(base).unwrap();
    if path.is_dir() {
        builder.append_dir(name, path).unwrap();
        let mut children: Vec<_> = fs::read_dir(path)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        children.sort();
        for child in children {
            append_tree(builder, base, &child);
        }
    } else {
        builder.append_path_with_name(path, name).unwrap();
    }
}

/// Every regular file under `src`, relative to the fixtures dir.
fn fixture_files(src: &str) -> Vec<PathBuf> {
    fn walk(base: &Path, path: &Path, out: &mut Vec<PathBuf>) {
        if path.is_dir() {
            for entry in fs::read_dir(path).unwrap() {
                walk(base, &entry.unwrap().path(), out);
            }
        } else {
            out.push(path.strip_prefix(base).unwrap().to_path_buf());
        }
    }
    let base = fixtures();
    let mut out = Vec::new();
    walk(&base, &base.join(src), &mut out);
    out.sort();
    out
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn coords(name: &str, release: &str) -> RegistryCoordinates {
    RegistryCoordinates::new("mynamespace", name, release, "digest")
}

fn etcd() -> Artifact {
    Artifact::new(coords("etcd", "0.6.1"), tarball(ETCD))
}

fn prometheus() -> Artifact {
    Artifact::new(coords("prometheus", "1.0.0"), tarball(PROMETHEUS))
}

fn descheduler() -> Artifact {
    Artifact::new(coords("descheduler", "0.0.1"), tarball(DESCHEDULER))
}

/// Output root that does not exist yet, inside a fresh temp dir.
fn download_dir() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("download").join("a1b2c3d4");
    (tmp, root)
}

#[test]
fn test_decode_with_nested_bundle_manifest() {
    let (_tmp, root) = download_dir();
    let decoder = ManifestDecoder::new(tracing::info_span!("test", test = "nested"), &root)
        .expect("decoder");

    let result = decoder.decode(&[etcd(), prometheus()]).expect("decode");

    assert!(result.flattened.is_none());
    assert_eq!(result.nested_directory, root);
    assert_eq!(result.flattened_count, 0);
    assert_eq!(result.nested_count, 2);
    assert_eq!(
        result.nested_paths,
        vec![
            root.join("mynamespace/etcd/0.6.1"),
            root.join("mynamespace/prometheus/1.0.0"),
        ]
    );
}

#[test]
fn test_decode_with_flattened_manifest() {
    let (_tmp, root) = download_dir();
    let decoder = ManifestDecoder::new(tracing::info_span!("test", test = "flattened"), &root)
        .expect("decoder");

    let result = decoder.decode(&[descheduler()]).expect("decode");

    assert_eq!(result.nested_directory, root);
    assert_eq!(result.flattened_count, 1);
    assert_eq!(result.nested_count, 0);

    let manifest = result.flattened.expect("flattened manifest");
    assert_eq!(manifest.custom_resource_definitions().count(), 1);
    assert_eq!(manifest.cluster_service_versions().count(), 1);
    let package = manifest.packages().next().expect("package");
    assert_eq!(package.name.as_deref(), Some("descheduler"));

    // Nothing is written for flattened bundles.
    assert!(!root.join("mynamespace/descheduler").exists());
}

#[test]
fn test_decode_with_both_flattened_and_nested_manifest() {
    let (_tmp, root) = download_dir();
    let decoder =
        ManifestDecoder::new(tracing::info_span!("test", test = "flattened+nested"), &root)
            .expect("decoder");

    let result = decoder
        .decode(&[etcd(), prometheus(), descheduler()])
        .expect("decode");

    assert!(result.flattened.is_some());
    assert_eq!(result.nested_directory, root);
    assert_eq!(result.flattened_count, 1);
    assert_eq!(result.nested_count, 2);
}

#[test]
fn test_nested_files_round_trip_exactly() {
    let (_tmp, root) = download_dir();
    let decoder = ManifestDecoder::new(tracing::Span::none(), &root).unwrap();
    decoder.decode(&[etcd()]).unwrap();

    let bundle_dir = root.join("mynamespace/etcd/0.6.1");
    let files = fixture_files(ETCD);
    assert!(files.len() > 3);
    for relative in files {
        let expected = fs::read(fixtures().join(&relative)).unwrap();
        let actual = fs::read(bundle_dir.join(&relative))
            .unwrap_or_else(|e| panic!("missing {}: {}", relative.display(), e));
        assert_eq!(actual, expected, "content differs for {}", relative.display());
    }
}

#[test]
fn test_strip_prefix_roots_tree_at_bundle() {
    let (_tmp, root) = download_dir();
    let decoder = ManifestDecoder::builder(&root)
        .config(DecoderConfig::default().with_strip_prefix("manifests/"))
        .build()
        .unwrap();

    decoder.decode(&[etcd()]).unwrap();

    let bundle_dir = root.join("mynamespace/etcd/0.6.1");
    assert!(bundle_dir.join("etcd/etcd.package.yaml").is_file());
    assert!(bundle_dir.join("etcd/0.9.0/etcdcluster.crd.yaml").is_file());
    assert!(!bundle_dir.join("manifests").exists());
}

#[test]
fn test_gzip_artifacts_decode_like_plain_tar() {
    let (_tmp, root) = download_dir();
    let decoder = ManifestDecoder::new(tracing::Span::none(), &root).unwrap();

    let batch = vec![
        Artifact::new(coords("etcd", "0.6.1"), gzip(&tarball(ETCD))),
        Artifact::new(coords("descheduler", "0.0.1"), gzip(&tarball(DESCHEDULER))),
    ];
    let result = decoder.decode(&batch).unwrap();

    assert_eq!(result.nested_count, 1);
    assert_eq!(result.flattened_count, 1);
    assert!(root
        .join("mynamespace/etcd/0.6.1/manifests/etcd/etcd.package.yaml")
        .is_file());
}

#[test]
fn test_classification_is_deterministic_for_identical_bytes() {
    let reader = TarArchiveReader::default();
    for blob in [tarball(ETCD), tarball(DESCHEDULER)] {
        let first = classify(&reader.extract(&blob).unwrap()).unwrap();
        for _ in 0..5 {
            let again = classify(&reader.extract(&blob).unwrap()).unwrap();
            assert_eq!(again, first);
        }
    }
}

#[test]
fn test_decoding_twice_overwrites_cleanly() {
    let (_tmp, root) = download_dir();
    let decoder = ManifestDecoder::new(tracing::Span::none(), &root).unwrap();

    let first = decoder.decode(&[etcd(), descheduler()]).unwrap();
    let second = decoder.decode(&[etcd(), descheduler()]).unwrap();

    assert_eq!(first.nested_count, second.nested_count);
    assert_eq!(first.flattened_count, second.flattened_count);
    assert_eq!(first.nested_paths, second.nested_paths);
}

#[test]
fn test_path_escape_fails_batch_and_writes_nothing() {
    let (tmp, root) = download_dir();
    let decoder = ManifestDecoder::new(tracing::Span::none(), &root).unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    let ok = b"packageName: evil\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(ok.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "evil/evil.package.yaml", &ok[..])
        .unwrap();

    let payload = b"owned: true\n";
    let mut header = tar::Header::new_old();
    let escape = b"../../../../escaped.yaml";
    header.as_old_mut().name[..escape.len()].copy_from_slice(escape);
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, &payload[..]).unwrap();
    let blob = builder.into_inner().unwrap();

    let err = decoder
        .decode(&[etcd(), Artifact::new(coords("evil", "1.0.0"), blob)])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Path);
    assert_eq!(err.stage(), Some(Stage::Materialize));
    assert!(!root.join("mynamespace/evil").exists());
    assert!(!tmp.path().join("escaped.yaml").exists());
    assert!(!root.join("escaped.yaml").exists());
}

#[test]
fn test_corrupt_archive_is_archive_error_with_coordinates() {
    let (_tmp, root) = download_dir();
    let decoder = ManifestDecoder::new(tracing::Span::none(), &root).unwrap();

    let mut blob = tarball(ETCD);
    blob.truncate(700);
    let err = decoder
        .decode(&[Artifact::new(coords("etcd", "0.6.1"), blob)])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Archive, "{}", err);
    assert_eq!(err.coordinates().map(|c| c.name.as_str()), Some("etcd"));
}

#[test]
fn test_output_root_under_a_file_is_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();

    let err = ManifestDecoder::new(tracing::Span::none(), blocker.join("download"))
        .err()
        .expect("config error");
    assert_eq!(err.kind(), ErrorKind::Config);
}
