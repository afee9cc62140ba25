//! Filesystem-backed storage for profile pictures and in-chat files.
//! Grounded in the reference file handler's two-subdirectory layout and
//! profile-picture resize-on-upload behavior.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;

const PFP_SIZE: u32 = 300;
const PFPS_DIR: &str = "user-profiles";
const CHATS_DIR: &str = "chats";

pub struct Blob {
    base_path: PathBuf,
}

impl Blob {
    pub async fn initialize(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(base_path.join(PFPS_DIR)).await?;
        tokio::fs::create_dir_all(base_path.join(CHATS_DIR)).await?;
        Ok(Self { base_path })
    }

    fn pfp_path(&self, username: &str) -> PathBuf {
        self.base_path.join(PFPS_DIR).join(format!("user-{username}.png"))
    }

    /// Resizes `contents` to a fixed thumbnail size and writes it, returning
    /// the stored file's name (what gets recorded in the users table).
    pub async fn save_pfp(&self, contents: &[u8], username: &str) -> Result<String> {
        let resized = resize_to_png(contents, PFP_SIZE, PFP_SIZE)?;
        let path = self.pfp_path(username);
        tokio::fs::write(&path, resized)
            .await
            .with_context(|| format!("failed to write profile picture for {username}"))?;
        Ok(format!("user-{username}.png"))
    }

    pub async fn load_pfp(&self, username: &str) -> Result<Option<Vec<u8>>> {
        read_if_exists(&self.pfp_path(username)).await
    }

    pub async fn load_pfp_by_path(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        read_if_exists(&self.base_path.join(PFPS_DIR).join(file_name)).await
    }

    fn chat_dir(&self, chat_id: i64) -> PathBuf {
        self.base_path.join(CHATS_DIR).join(chat_id.to_string())
    }

    pub async fn create_chat(&self, chat_id: i64) -> Result<()> {
        tokio::fs::create_dir_all(self.chat_dir(chat_id)).await?;
        Ok(())
    }

    pub async fn save_file(&self, contents: &[u8], chat_id: i64, file_name: &str) -> Result<()> {
        self.create_chat(chat_id).await?;
        let path = self.chat_dir(chat_id).join(file_name);
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("failed to write file {file_name} for chat {chat_id}"))?;
        Ok(())
    }

    pub async fn load_file(&self, chat_id: i64, file_name: &str) -> Result<Option<Vec<u8>>> {
        read_if_exists(&self.chat_dir(chat_id).join(file_name)).await
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn resize_to_png(image_bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let image = image::load_from_memory(image_bytes).context("unrecognized image format")?;
    let resized = image.resize_exact(width, height, FilterType::Lanczos3);
    let mut buffer = Vec::new();
    resized
        .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
        .context("failed to encode resized image as PNG")?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_pixel_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[tokio::test]
    async fn saves_and_loads_a_resized_profile_picture() {
        let dir = tempdir();
        let blob = Blob::initialize(&dir).await.unwrap();

        let stored_name = blob.save_pfp(&one_pixel_png(), "alice").await.unwrap();
        assert_eq!(stored_name, "user-alice.png");

        let loaded = blob.load_pfp("alice").await.unwrap().unwrap();
        let decoded = image::load_from_memory(&loaded).unwrap();
        assert_eq!(decoded.width(), PFP_SIZE);
        assert_eq!(decoded.height(), PFP_SIZE);
    }

    #[tokio::test]
    async fn missing_file_returns_none_not_an_error() {
        let dir = tempdir();
        let blob = Blob::initialize(&dir).await.unwrap();
        assert!(blob.load_file(1, "nope.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chat_files_round_trip_under_their_chat_id_directory() {
        let dir = tempdir();
        let blob = Blob::initialize(&dir).await.unwrap();
        blob.save_file(b"file contents", 7, "notes.txt").await.unwrap();
        assert_eq!(
            blob.load_file(7, "notes.txt").await.unwrap().unwrap(),
            b"file contents"
        );
    }

    fn tempdir() -> PathBuf {
        let path = std::env::temp_dir().join(format!("strife-blob-test-{}", rand::random::<u64>()));
        path
    }
}
