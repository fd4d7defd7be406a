// texture.rs — 全景纹理：占位像素、后台加载、上传与 mipmap 策略

use image::io::Reader as ImageReader;
use image::{imageops::FilterType, GenericImageView, RgbaImage};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::thread;

pub const DEFAULT_IMAGE: &str = "pano.jpg";

/// 加载完成前显示的 1×1 不透明像素
pub const PLACEHOLDER_PIXEL: [u8; 4] = [0, 255, 255, 255];

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to open image: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to download image: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Where the panorama comes from: a local file, or a single http(s) GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
}

impl ImageSource {
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ImageSource::Url(source.to_string())
        } else {
            ImageSource::Path(PathBuf::from(source))
        }
    }

    pub fn fetch(&self) -> Result<RgbaImage, FetchError> {
        let img = match self {
            ImageSource::Path(path) => {
                let reader = BufReader::new(File::open(path)?);
                let mut reader = ImageReader::new(reader).with_guessed_format()?;
                reader.no_limits();
                reader.decode()?
            }
            ImageSource::Url(url) => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(None::<std::time::Duration>)
                    .build()?;
                let bytes = client.get(url).send()?.error_for_status()?.bytes()?;
                let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
                reader.no_limits();
                reader.decode()?
            }
        };

        let (w, h) = img.dimensions();
        log::info!("panorama decoded: {}x{}", w, h);
        Ok(img.to_rgba8())
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Path(p) => write!(f, "{}", p.display()),
            ImageSource::Url(u) => f.write_str(u),
        }
    }
}

#[derive(Debug)]
pub enum FetchPoll {
    /// No fetch in flight (never started, or already delivered/failed).
    Idle,
    Pending,
    Ready(TextureUpload),
    Failed,
}

/// One background image load. Delivers at most once; never retries.
///
/// Decoding, downscaling and mip generation all happen on the loader thread,
/// so the render loop only ever receives a finished [`TextureUpload`].
pub struct ImageFetch {
    rx: Option<Receiver<TextureUpload>>,
}

impl ImageFetch {
    pub fn spawn(source: ImageSource, max_dimension: u32) -> Self {
        let (tx, rx) = channel();

        thread::spawn(move || {
            log::info!("loading panorama in background: {}", source);
            match source.fetch() {
                Ok(rgba) => {
                    let prepared = TextureUpload::prepare(fit_to_limit(rgba, max_dimension));
                    match prepared.plan {
                        TexturePlan::Mipmapped { mip_levels } => {
                            log::info!("power-of-two panorama, generated {} mip levels", mip_levels)
                        }
                        TexturePlan::ClampToEdge => {
                            log::info!("non-power-of-two panorama, mipmaps off, clamp-to-edge")
                        }
                    }
                    if tx.send(prepared).is_err() {
                        log::warn!("render loop went away before the panorama arrived");
                    }
                }
                // 失败时丢弃 tx，接收端看到 Disconnected，占位纹理保持不变
                Err(e) => log::warn!("{} ({}), keeping placeholder", e, source),
            }
        });

        Self { rx: Some(rx) }
    }

    /// Never blocks.
    pub fn poll(&mut self) -> FetchPoll {
        let Some(rx) = &self.rx else {
            return FetchPoll::Idle;
        };

        match rx.try_recv() {
            Ok(upload) => {
                self.rx = None;
                FetchPoll::Ready(upload)
            }
            Err(TryRecvError::Empty) => FetchPoll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.rx = None;
                FetchPoll::Failed
            }
        }
    }

    pub fn in_flight(&self) -> bool {
        self.rx.is_some()
    }
}

/// Sampling setup chosen from the image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexturePlan {
    /// Both sides are powers of two: full mip chain, repeat wrap.
    Mipmapped { mip_levels: u32 },
    /// Otherwise: single level, clamp-to-edge on both axes.
    ClampToEdge,
}

impl TexturePlan {
    pub fn for_size(width: u32, height: u32) -> Self {
        if width.is_power_of_two() && height.is_power_of_two() {
            TexturePlan::Mipmapped {
                mip_levels: 32 - width.max(height).leading_zeros(),
            }
        } else {
            TexturePlan::ClampToEdge
        }
    }

    pub fn mip_level_count(&self) -> u32 {
        match self {
            TexturePlan::Mipmapped { mip_levels } => *mip_levels,
            TexturePlan::ClampToEdge => 1,
        }
    }

    pub fn address_mode(&self) -> wgpu::AddressMode {
        match self {
            TexturePlan::Mipmapped { .. } => wgpu::AddressMode::Repeat,
            TexturePlan::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        }
    }

    fn sampler_descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        let address = self.address_mode();
        wgpu::SamplerDescriptor {
            label: Some("panorama_sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: match self {
                TexturePlan::Mipmapped { .. } => wgpu::FilterMode::Linear,
                TexturePlan::ClampToEdge => wgpu::FilterMode::Nearest,
            },
            ..Default::default()
        }
    }
}

/// Image levels ready for upload: level 0 plus any generated mips.
#[derive(Debug)]
pub struct TextureUpload {
    pub plan: TexturePlan,
    pub levels: Vec<RgbaImage>,
}

impl TextureUpload {
    pub fn prepare(img: RgbaImage) -> Self {
        let plan = TexturePlan::for_size(img.width(), img.height());
        let levels = match plan {
            TexturePlan::Mipmapped { mip_levels } => generate_mipmaps(img, mip_levels),
            TexturePlan::ClampToEdge => vec![img],
        };
        Self { plan, levels }
    }

    pub fn width(&self) -> u32 {
        self.levels[0].width()
    }

    pub fn height(&self) -> u32 {
        self.levels[0].height()
    }
}

/// 每级宽高减半（最小 1），直到 1×1
pub fn generate_mipmaps(base: RgbaImage, mip_levels: u32) -> Vec<RgbaImage> {
    let mut levels = Vec::with_capacity(mip_levels as usize);
    levels.push(base);
    for level in 1..mip_levels {
        let prev = &levels[level as usize - 1];
        let w = (prev.width() / 2).max(1);
        let h = (prev.height() / 2).max(1);
        let next = image::imageops::resize(prev, w, h, FilterType::Triangle);
        levels.push(next);
    }
    levels
}

/// 超过 GPU 纹理尺寸上限时等比缩小
pub fn fit_to_limit(img: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    if src_w <= max_dimension && src_h <= max_dimension {
        return img;
    }

    let scale = max_dimension as f32 / src_w.max(src_h) as f32;
    let new_w = ((src_w as f32 * scale) as u32).clamp(1, max_dimension);
    let new_h = ((src_h as f32 * scale) as u32).clamp(1, max_dimension);
    log::warn!(
        "panorama {}x{} exceeds GPU limit {}, scaled to {}x{}",
        src_w,
        src_h,
        max_dimension,
        new_w,
        new_h
    );
    image::imageops::resize(&img, new_w, new_h, FilterType::Lanczos3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    Placeholder,
    Loaded { width: u32, height: u32 },
}

pub struct PanoramaTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub state: TextureState,
}

impl PanoramaTexture {
    /// Usable for rendering immediately.
    pub fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let pixel = RgbaImage::from_raw(1, 1, PLACEHOLDER_PIXEL.to_vec())
            .unwrap_or_else(|| RgbaImage::new(1, 1));
        let (texture, view, sampler) = upload(device, queue, &TextureUpload::prepare(pixel), "placeholder_texture");
        Self {
            texture,
            view,
            sampler,
            state: TextureState::Placeholder,
        }
    }

    /// Swaps in a prepared image. Only GPU copies happen here.
    /// The caller must rebuild any bind group holding the old view.
    pub fn replace(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, prepared: &TextureUpload) {
        let (texture, view, sampler) = upload(device, queue, prepared, "panorama_texture");
        self.texture = texture;
        self.view = view;
        self.sampler = sampler;
        self.state = TextureState::Loaded {
            width: prepared.width(),
            height: prepared.height(),
        };
    }
}

fn upload(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    prepared: &TextureUpload,
    label: &str,
) -> (wgpu::Texture, wgpu::TextureView, wgpu::Sampler) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        size: wgpu::Extent3d {
            width: prepared.width(),
            height: prepared.height(),
            depth_or_array_layers: 1,
        },
        mip_level_count: prepared.plan.mip_level_count(),
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        label: Some(label),
        view_formats: &[],
    });

    for (level, img) in prepared.levels.iter().enumerate() {
        let (width, height) = img.dimensions();
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: level as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            img,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = device.create_sampler(&prepared.plan.sampler_descriptor());
    (texture, view, sampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::time::{Duration, Instant};

    fn wait(fetch: &mut ImageFetch) -> FetchPoll {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match fetch.poll() {
                FetchPoll::Pending if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(5))
                }
                other => return other,
            }
        }
    }

    #[test]
    fn power_of_two_image_gets_mipmaps() {
        let upload = TextureUpload::prepare(RgbaImage::new(256, 256));
        assert_eq!(upload.plan, TexturePlan::Mipmapped { mip_levels: 9 });
        assert_eq!(upload.plan.address_mode(), wgpu::AddressMode::Repeat);
        assert_eq!(upload.levels.len(), 9);
        assert_eq!(upload.levels[1].dimensions(), (128, 128));
        assert_eq!(upload.levels[8].dimensions(), (1, 1));
    }

    #[test]
    fn non_power_of_two_image_clamps_without_mipmaps() {
        let upload = TextureUpload::prepare(RgbaImage::new(300, 200));
        assert_eq!(upload.plan, TexturePlan::ClampToEdge);
        assert_eq!(upload.plan.mip_level_count(), 1);
        assert_eq!(upload.levels.len(), 1);

        let desc = upload.plan.sampler_descriptor();
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.address_mode_v, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.mipmap_filter, wgpu::FilterMode::Nearest);
    }

    #[test]
    fn one_side_off_power_of_two_is_clamped() {
        assert_eq!(TexturePlan::for_size(512, 300), TexturePlan::ClampToEdge);
        assert_eq!(TexturePlan::for_size(2048, 1024), TexturePlan::Mipmapped { mip_levels: 12 });
    }

    #[test]
    fn rectangular_mip_chain_bottoms_out_at_one() {
        let levels = generate_mipmaps(RgbaImage::new(8, 2), 4);
        let dims: Vec<_> = levels.iter().map(|l| l.dimensions()).collect();
        assert_eq!(dims, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
    }

    #[test]
    fn placeholder_is_a_single_level() {
        let pixel = RgbaImage::from_pixel(1, 1, Rgba(PLACEHOLDER_PIXEL));
        let upload = TextureUpload::prepare(pixel);
        assert_eq!(upload.plan.mip_level_count(), 1);
        assert_eq!(upload.levels[0].get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn oversized_image_is_scaled_to_limit() {
        let img = fit_to_limit(RgbaImage::new(64, 32), 16);
        assert_eq!(img.dimensions(), (16, 8));
        let untouched = fit_to_limit(RgbaImage::new(10, 5), 16);
        assert_eq!(untouched.dimensions(), (10, 5));
    }

    #[test]
    fn source_kind_follows_scheme() {
        assert_eq!(
            ImageSource::parse("https://example.com/pano.jpg"),
            ImageSource::Url("https://example.com/pano.jpg".into())
        );
        assert_eq!(ImageSource::parse(DEFAULT_IMAGE), ImageSource::Path(PathBuf::from("pano.jpg")));
    }

    #[test]
    fn background_fetch_delivers_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pano.png");
        RgbaImage::from_pixel(300, 150, Rgba([10, 20, 30, 255])).save(&path).unwrap();

        let mut fetch = ImageFetch::spawn(ImageSource::Path(path), 8192);
        match wait(&mut fetch) {
            FetchPoll::Ready(upload) => {
                assert_eq!(upload.plan, TexturePlan::ClampToEdge);
                assert_eq!(upload.levels.len(), 1);
                assert_eq!(upload.levels[0].dimensions(), (300, 150));
                assert_eq!(upload.levels[0].get_pixel(0, 0).0, [10, 20, 30, 255]);
            }
            other => panic!("expected image, got {other:?}"),
        }
        assert!(!fetch.in_flight());
        assert!(matches!(fetch.poll(), FetchPoll::Idle));
    }

    #[test]
    fn loader_thread_builds_mip_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pano.png");
        RgbaImage::from_pixel(64, 32, Rgba([200, 100, 50, 255])).save(&path).unwrap();

        let mut fetch = ImageFetch::spawn(ImageSource::Path(path), 8192);
        match wait(&mut fetch) {
            FetchPoll::Ready(upload) => {
                assert_eq!(upload.plan, TexturePlan::Mipmapped { mip_levels: 7 });
                let dims: Vec<_> = upload.levels.iter().map(|l| l.dimensions()).collect();
                assert_eq!(
                    dims,
                    vec![(64, 32), (32, 16), (16, 8), (8, 4), (4, 2), (2, 1), (1, 1)]
                );
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn loader_thread_applies_texture_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pano.png");
        RgbaImage::new(128, 64).save(&path).unwrap();

        let mut fetch = ImageFetch::spawn(ImageSource::Path(path), 32);
        match wait(&mut fetch) {
            FetchPoll::Ready(upload) => {
                assert_eq!((upload.width(), upload.height()), (32, 16));
                assert_eq!(upload.plan.mip_level_count(), 6);
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    /// 单次 HTTP 服务：读完请求头后写回固定响应
    fn serve_once(status: &str, body: Vec<u8>) -> String {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://{}/pano.png", addr)
    }

    #[test]
    fn url_source_is_downloaded() {
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 8, Rgba([1, 2, 3, 255])))
            .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .unwrap();
        let url = serve_once("200 OK", png);

        let source = ImageSource::parse(&url);
        assert!(matches!(source, ImageSource::Url(_)));
        let mut fetch = ImageFetch::spawn(source, 8192);
        match wait(&mut fetch) {
            FetchPoll::Ready(upload) => {
                assert_eq!(upload.levels[0].dimensions(), (16, 8));
                assert_eq!(upload.levels[0].get_pixel(3, 3).0, [1, 2, 3, 255]);
                assert_eq!(upload.plan, TexturePlan::Mipmapped { mip_levels: 5 });
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn http_error_status_keeps_placeholder() {
        let url = serve_once("404 Not Found", Vec::new());
        let mut fetch = ImageFetch::spawn(ImageSource::parse(&url), 8192);
        assert!(matches!(wait(&mut fetch), FetchPoll::Failed));
        assert!(matches!(fetch.poll(), FetchPoll::Idle));
    }

    #[test]
    fn missing_file_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetch = ImageFetch::spawn(ImageSource::Path(dir.path().join("nope.jpg")), 8192);
        assert!(matches!(wait(&mut fetch), FetchPoll::Failed));
        assert!(matches!(fetch.poll(), FetchPoll::Idle));
    }

    #[test]
    fn garbage_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pano.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        assert!(matches!(ImageSource::Path(path).fetch(), Err(FetchError::Decode(_))));
    }
}
