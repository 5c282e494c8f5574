//! Shared helpers for the HTTP integration tests

#![allow(dead_code)]

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use bgremove_server::{router, AppState, BackgroundRemover, ServerConfig};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Encode a small gradient as PNG
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 5 % 256) as u8, (y * 5 % 256) as u8, 128])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode test PNG");
    bytes
}

/// Multipart body with one file field
pub fn image_form(field: &str, bytes: Vec<u8>, filename: &str, mime: &str) -> MultipartForm {
    MultipartForm::new().add_part(field, Part::bytes(bytes).file_name(filename).mime_type(mime))
}

pub fn png_form(bytes: Vec<u8>) -> MultipartForm {
    image_form("image", bytes, "cat.png", "image/png")
}

pub fn config_with_scratch(scratch_dir: &Path) -> ServerConfig {
    ServerConfig::builder()
        .scratch_dir(scratch_dir)
        .build()
        .expect("Failed to build test config")
}

pub fn test_server(config: ServerConfig, remover: Arc<dyn BackgroundRemover>) -> TestServer {
    TestServer::new(router(AppState::new(config, remover))).expect("Failed to create test server")
}

/// Entries currently in a scratch directory
pub fn scratch_entries(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}
