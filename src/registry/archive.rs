//! Reading and writing `docker save` archives, and flattening layers into a
//! root filesystem.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::digest::Digest;
use crate::error::{ResourceError, Result};
use crate::registry::manifest::{DOCKER_CONFIG, DOCKER_LAYER, ImageConfig};

const ARCHIVE_MANIFEST: &str = "manifest.json";
const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ArchiveManifest {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// A blob ready to upload.
#[derive(Debug, Clone)]
pub struct Blob {
    pub media_type: &'static str,
    pub digest: Digest,
    pub data: Vec<u8>,
}

impl Blob {
    fn new(media_type: &'static str, data: Vec<u8>) -> Self {
        Self {
            media_type,
            digest: Digest::of(&data),
            data,
        }
    }
}

#[derive(Debug)]
pub struct PreparedImage {
    pub config: Blob,
    pub layers: Vec<Blob>,
}

/// An image fetched from a registry, with its layer blobs on local disk.
#[derive(Debug)]
pub struct DownloadedImage {
    pub config: Vec<u8>,
    pub config_digest: Digest,
    pub layers: Vec<(Digest, PathBuf)>,
}

fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Wraps `reader` in a gzip decoder when the stream starts with the gzip magic.
fn decompressed<R: Read + 'static>(reader: R) -> io::Result<Box<dyn Read>> {
    let mut reader = BufReader::new(reader);
    if is_gzip(reader.fill_buf()?) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Joins a relative archive path onto `root`, refusing anything that would
/// escape it.
fn safe_join(root: &Path, path: &Path) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(joined)
}

fn member(root: &Path, name: &str) -> Result<PathBuf> {
    safe_join(root, Path::new(name))
        .ok_or_else(|| ResourceError::image(format!("archive member escapes the archive: {name}")))
}

/// Loads the first image of a `docker save` archive (optionally gzipped).
/// Uncompressed layers are gzipped so they can be pushed as
/// `tar.gzip` layers.
pub fn read_docker_archive(path: &Path) -> Result<PreparedImage> {
    let unpacked = tempfile::tempdir()?;

    let mut archive = tar::Archive::new(decompressed(File::open(path)?)?);
    archive.unpack(unpacked.path())?;

    let manifest = fs::read(unpacked.path().join(ARCHIVE_MANIFEST)).map_err(|err| {
        ResourceError::image(format!("{} is not a docker archive: {err}", path.display()))
    })?;
    let manifest: Vec<ArchiveManifest> = serde_json::from_slice(&manifest)?;
    let manifest = manifest
        .into_iter()
        .next()
        .ok_or_else(|| ResourceError::image(format!("{} contains no images", path.display())))?;

    debug!(
        config = %manifest.config,
        layers = manifest.layers.len(),
        tags = ?manifest.repo_tags,
        "Read docker archive"
    );

    let config = fs::read(member(unpacked.path(), &manifest.config)?)?;

    let layers = manifest
        .layers
        .iter()
        .map(|layer| {
            let data = fs::read(member(unpacked.path(), layer)?)?;
            let data = if is_gzip(&data) { data } else { gzip(&data)? };
            Ok(Blob::new(DOCKER_LAYER, data))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PreparedImage {
        config: Blob::new(DOCKER_CONFIG, config),
        layers,
    })
}

fn append_file(builder: &mut tar::Builder<File>, name: &str, data: &[u8]) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data)
}

/// Writes a `docker load`-able archive tagged `repo_tag`.
pub fn write_docker_archive(dest: &Path, repo_tag: &str, image: &DownloadedImage) -> Result<()> {
    let mut builder = tar::Builder::new(File::create(dest)?);

    let config = image.config_digest.archive_name(".json");
    append_file(&mut builder, &config, &image.config)?;

    let mut layers = Vec::with_capacity(image.layers.len());
    for (digest, path) in &image.layers {
        let name = format!("{}/layer.tar", digest.hash);
        builder.append_path_with_name(path, &name)?;
        layers.push(name);
    }

    let manifest = vec![ArchiveManifest {
        config,
        repo_tags: Some(vec![repo_tag.to_string()]),
        layers,
    }];
    append_file(&mut builder, ARCHIVE_MANIFEST, &serde_json::to_vec(&manifest)?)?;

    builder.into_inner()?.flush()?;
    Ok(())
}

fn remove(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn clear_dir(path: &Path) -> io::Result<()> {
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries {
                remove(&entry?.path())?;
            }
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Whether a directory between `rootfs` and `target` is a symlink. Writing or
/// deleting through one would land outside the root filesystem.
fn crosses_symlink(rootfs: &Path, target: &Path) -> io::Result<bool> {
    let Some(relative) = target.parent().and_then(|parent| parent.strip_prefix(rootfs).ok())
    else {
        return Ok(true);
    };

    let mut current = rootfs.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(true),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}

fn unpack_layer(rootfs: &Path, layer: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(decompressed(File::open(layer)?)?);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        let Some(target) = safe_join(rootfs, &path) else {
            warn!(path = %path.display(), "Skipping layer entry outside the root filesystem");
            continue;
        };
        if crosses_symlink(rootfs, &target)? {
            warn!(path = %path.display(), "Skipping layer entry below a symlink");
            continue;
        }
        let parent = target.parent().unwrap_or(rootfs).to_path_buf();

        match path.file_name().and_then(|name| name.to_str()) {
            Some(OPAQUE_WHITEOUT) => clear_dir(&parent)?,
            Some(name) if name.starts_with(WHITEOUT_PREFIX) => {
                remove(&parent.join(&name[WHITEOUT_PREFIX.len()..]))?
            }
            _ => {
                let is_dir = entry.header().entry_type().is_dir();
                if let Ok(existing) = fs::symlink_metadata(&target) {
                    if !(is_dir && existing.is_dir()) {
                        remove(&target)?;
                    }
                }
                entry.unpack_in(rootfs)?;
            }
        }
    }

    Ok(())
}

/// Applies `layers` in order on top of `rootfs`, honouring whiteouts.
/// File ownership is not preserved.
pub fn unpack_rootfs(rootfs: &Path, layers: &[PathBuf]) -> Result<()> {
    fs::create_dir_all(rootfs)?;
    for layer in layers {
        debug!(layer = %layer.display(), "Unpacking layer");
        unpack_layer(rootfs, layer)?;
    }
    Ok(())
}

/// Writes `metadata.json` with the environment and user of the image config.
pub fn write_metadata(dir: &Path, config: &[u8]) -> Result<()> {
    let config: ImageConfig = serde_json::from_slice(config)?;
    let container = config.config.unwrap_or_default();
    fs::write(dir.join("metadata.json"), serde_json::to_vec(&container)?)?;
    Ok(())
}
