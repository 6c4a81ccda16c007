use crate::selection::SelectionOutcome;
use common::{
    ChangeType, Placement, Rect, ScreenSettingsCollection, Wallpaper, WallpaperEffects,
};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building or applying a wallpaper image.
#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Failed to load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resize error: {0}")]
    Resize(String),

    #[error("No screens to compose onto")]
    NoScreens,

    #[error("Failed to apply wallpaper: {0}")]
    Apply(String),

    #[error("Build worker failed: {0}")]
    Worker(String),
}

/// Wallpapers currently shown (or about to be shown) on the desktop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveWallpapers {
    /// Spans the whole desktop, below any per-screen wallpaper
    pub multiscreen: Option<Arc<Wallpaper>>,
    /// Indexed by screen
    pub per_screen: Vec<Option<Arc<Wallpaper>>>,
}

impl ActiveWallpapers {
    /// Lay out a selection onto the screens according to the change type.
    ///
    /// Static screens always show their static wallpaper. `OneByOne` keeps
    /// the previous wallpapers of the screens that did not change.
    pub fn arrange(
        outcome: &SelectionOutcome,
        screens: &ScreenSettingsCollection,
        change_type: ChangeType,
        previous: &ActiveWallpapers,
    ) -> Self {
        let static_for = |index: usize| {
            screens
                .get(index)
                .filter(|s| !s.cycle_randomly)
                .and_then(|s| s.static_wallpaper.clone())
                .map(Arc::new)
        };

        if outcome.multiscreen {
            return Self {
                multiscreen: outcome.pick_for(0).cloned(),
                per_screen: (0..screens.len()).map(static_for).collect(),
            };
        }

        let per_screen: Vec<Option<Arc<Wallpaper>>> = screens
            .iter()
            .enumerate()
            .map(|(index, screen)| {
                if !screen.cycle_randomly {
                    return static_for(index);
                }
                match change_type {
                    ChangeType::AllSame => outcome.pick_for(index).cloned(),
                    ChangeType::AllCloned => outcome.pick_for(0).cloned(),
                    ChangeType::OneByOne => outcome
                        .pick_for(index)
                        .or_else(|| previous.per_screen.get(index).and_then(Option::as_ref))
                        .cloned(),
                }
            })
            .collect();

        // A previous multiscreen image stays visible under screens not yet replaced
        let multiscreen = if change_type == ChangeType::OneByOne
            && screens
                .iter()
                .zip(&per_screen)
                .any(|(screen, wallpaper)| screen.cycle_randomly && wallpaper.is_none())
        {
            previous.multiscreen.clone()
        } else {
            None
        };

        Self {
            multiscreen,
            per_screen,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.multiscreen.is_none() && self.per_screen.iter().all(Option::is_none)
    }
}

/// Input for one composite.
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    /// Screen bounds in desktop coordinates
    pub bounds: Vec<Rect>,
    pub wallpapers: ActiveWallpapers,
    /// Wallpaper opacity over its background color (0.0-1.0)
    pub opacity: f32,
    /// Lanczos3 instead of bilinear resizing
    pub high_quality: bool,
}

/// Turns a composite request into a single desktop-sized image.
pub trait Compositor: Send + Sync {
    fn composite(&self, request: &CompositeRequest) -> Result<RgbaImage, CompositeError>;
}

/// Compositor decoding image files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCompositor;

impl Compositor for ImageCompositor {
    fn composite(&self, request: &CompositeRequest) -> Result<RgbaImage, CompositeError> {
        let desktop = request
            .bounds
            .iter()
            .copied()
            .reduce(|acc, rect| acc.union(&rect))
            .filter(|rect| rect.width > 0 && rect.height > 0)
            .ok_or(CompositeError::NoScreens)?;

        let mut canvas = ImageBuffer::from_pixel(desktop.width, desktop.height, Rgba([0, 0, 0, 255]));

        if let Some(ref wallpaper) = request.wallpapers.multiscreen {
            let layer = render_wallpaper(
                wallpaper,
                desktop.width,
                desktop.height,
                request.opacity,
                request.high_quality,
            )?;
            image::imageops::replace(&mut canvas, &layer, 0, 0);
        }

        let layers: Vec<(Rect, RgbaImage)> = request
            .bounds
            .par_iter()
            .zip(request.wallpapers.per_screen.par_iter())
            .filter_map(|(rect, wallpaper)| wallpaper.as_ref().map(|w| (*rect, w)))
            .filter(|(rect, _)| rect.width > 0 && rect.height > 0)
            .map(|(rect, wallpaper)| {
                render_wallpaper(
                    wallpaper,
                    rect.width,
                    rect.height,
                    request.opacity,
                    request.high_quality,
                )
                .map(|layer| (rect, layer))
            })
            .collect::<Result<_, _>>()?;

        for (rect, layer) in layers {
            image::imageops::replace(
                &mut canvas,
                &layer,
                i64::from(rect.x) - i64::from(desktop.x),
                i64::from(rect.y) - i64::from(desktop.y),
            );
        }

        log::debug!(
            "Composed {}x{} desktop image",
            canvas.width(),
            canvas.height()
        );

        Ok(canvas)
    }
}

/// Write the composed image, creating the parent directory if needed.
pub fn write_image(image: &RgbaImage, path: &Path) -> Result<(), CompositeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Render one wallpaper into a `width` x `height` tile.
fn render_wallpaper(
    wallpaper: &Wallpaper,
    width: u32,
    height: u32,
    opacity: f32,
    high_quality: bool,
) -> Result<RgbaImage, CompositeError> {
    let image = image::open(&wallpaper.image_path).map_err(|source| CompositeError::Load {
        path: wallpaper.image_path.clone(),
        source,
    })?;

    let mut image = image.to_rgba8();
    apply_effects(&mut image, wallpaper.effects);

    let target_width = scaled_dimension(width, wallpaper.scale.0);
    let target_height = scaled_dimension(height, wallpaper.scale.1);
    let mut placed = place_image(
        &image,
        target_width,
        target_height,
        wallpaper.placement,
        high_quality,
    )?;

    if opacity < 1.0 {
        let opacity = opacity.clamp(0.0, 1.0);
        for pixel in placed.pixels_mut() {
            pixel[3] = (f32::from(pixel[3]) * opacity).round() as u8;
        }
    }

    let mut tile = ImageBuffer::from_pixel(width, height, Rgba(wallpaper.background_color.to_array()));
    let x = (i64::from(width) - i64::from(target_width)) / 2 + i64::from(wallpaper.offset.0);
    let y = (i64::from(height) - i64::from(target_height)) / 2 + i64::from(wallpaper.offset.1);
    image::imageops::overlay(&mut tile, &placed, x, y);

    Ok(tile)
}

fn scaled_dimension(size: u32, delta: i32) -> u32 {
    (i64::from(size) + i64::from(delta)).clamp(1, i64::from(u32::MAX)) as u32
}

/// Apply flip and mirror effects in place
fn apply_effects(image: &mut RgbaImage, effects: WallpaperEffects) {
    if effects.contains(WallpaperEffects::FLIP_HORIZONTAL) {
        image::imageops::flip_horizontal_in_place(image);
    }
    if effects.contains(WallpaperEffects::FLIP_VERTICAL) {
        image::imageops::flip_vertical_in_place(image);
    }

    let (width, height) = image.dimensions();

    if effects.contains(WallpaperEffects::MIRROR_LEFT) {
        for y in 0..height {
            for x in width.div_ceil(2)..width {
                let source = *image.get_pixel(width - 1 - x, y);
                image.put_pixel(x, y, source);
            }
        }
    }
    if effects.contains(WallpaperEffects::MIRROR_RIGHT) {
        for y in 0..height {
            for x in 0..width / 2 {
                let source = *image.get_pixel(width - 1 - x, y);
                image.put_pixel(x, y, source);
            }
        }
    }
    if effects.contains(WallpaperEffects::MIRROR_TOP) {
        for y in height.div_ceil(2)..height {
            for x in 0..width {
                let source = *image.get_pixel(x, height - 1 - y);
                image.put_pixel(x, y, source);
            }
        }
    }
    if effects.contains(WallpaperEffects::MIRROR_BOTTOM) {
        for y in 0..height / 2 {
            for x in 0..width {
                let source = *image.get_pixel(x, height - 1 - y);
                image.put_pixel(x, y, source);
            }
        }
    }
}

/// Place an image into a transparent `target_width` x `target_height` layer
fn place_image(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    placement: Placement,
    high_quality: bool,
) -> Result<RgbaImage, CompositeError> {
    match placement {
        Placement::Center => Ok(center_image(image, target_width, target_height)),
        Placement::Tile => Ok(tile_image(image, target_width, target_height)),
        Placement::Stretch => resize_image_fast(image, target_width, target_height, high_quality),
        Placement::Uniform => fit_image(image, target_width, target_height, high_quality),
        Placement::UniformToFill => fill_image(image, target_width, target_height, high_quality),
    }
}

fn transparent(width: u32, height: u32) -> RgbaImage {
    ImageBuffer::from_pixel(width, height, Rgba([0, 0, 0, 0]))
}

/// Center image without scaling
fn center_image(image: &RgbaImage, target_width: u32, target_height: u32) -> RgbaImage {
    let mut output = transparent(target_width, target_height);
    let (img_width, img_height) = image.dimensions();

    let x_offset = (i64::from(target_width) - i64::from(img_width)) / 2;
    let y_offset = (i64::from(target_height) - i64::from(img_height)) / 2;

    image::imageops::overlay(&mut output, image, x_offset, y_offset);
    output
}

/// Tile the image from the top-left corner
fn tile_image(image: &RgbaImage, target_width: u32, target_height: u32) -> RgbaImage {
    let mut output = transparent(target_width, target_height);
    let (img_width, img_height) = image.dimensions();
    if img_width == 0 || img_height == 0 {
        return output;
    }

    let tiles_x = target_width.div_ceil(img_width);
    let tiles_y = target_height.div_ceil(img_height);

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x = tx * img_width;
            let y = ty * img_height;
            image::imageops::overlay(&mut output, image, i64::from(x), i64::from(y));
        }
    }

    output
}

/// Scale to cover the target (may crop)
fn fill_image(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    high_quality: bool,
) -> Result<RgbaImage, CompositeError> {
    let (img_width, img_height) = image.dimensions();
    let target_ratio = target_width as f32 / target_height as f32;
    let img_ratio = img_width as f32 / img_height as f32;

    let (scale_width, scale_height) = if target_ratio > img_ratio {
        // Target is wider, scale to width
        let scale = target_width as f32 / img_width as f32;
        (target_width, ((img_height as f32 * scale).round() as u32).max(1))
    } else {
        // Target is taller, scale to height
        let scale = target_height as f32 / img_height as f32;
        (((img_width as f32 * scale).round() as u32).max(1), target_height)
    };

    let resized = resize_image_fast(image, scale_width, scale_height, high_quality)?;

    if scale_width == target_width && scale_height == target_height {
        return Ok(resized);
    }

    let x_offset = scale_width.saturating_sub(target_width) / 2;
    let y_offset = scale_height.saturating_sub(target_height) / 2;
    Ok(
        image::imageops::crop_imm(&resized, x_offset, y_offset, target_width, target_height)
            .to_image(),
    )
}

/// Scale to fit inside the target (may letterbox)
fn fit_image(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    high_quality: bool,
) -> Result<RgbaImage, CompositeError> {
    let (img_width, img_height) = image.dimensions();
    let target_ratio = target_width as f32 / target_height as f32;
    let img_ratio = img_width as f32 / img_height as f32;

    let (scale_width, scale_height) = if target_ratio > img_ratio {
        // Target is wider than image, scale to height
        let scale = target_height as f32 / img_height as f32;
        (((img_width as f32 * scale).round() as u32).max(1), target_height)
    } else {
        // Target is taller than image (or same), scale to width
        let scale = target_width as f32 / img_width as f32;
        (target_width, ((img_height as f32 * scale).round() as u32).max(1))
    };

    let resized = resize_image_fast(image, scale_width, scale_height, high_quality)?;
    Ok(center_image(&resized, target_width, target_height))
}

/// Fast image resizing using fast_image_resize
fn resize_image_fast(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    high_quality: bool,
) -> Result<RgbaImage, CompositeError> {
    use fast_image_resize as fr;

    let (src_width, src_height) = image.dimensions();
    if (src_width, src_height) == (target_width, target_height) {
        return Ok(image.clone());
    }

    let src = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        image.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| CompositeError::Resize(e.to_string()))?;

    let mut dst = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let filter = if high_quality {
        fr::FilterType::Lanczos3
    } else {
        fr::FilterType::Bilinear
    };

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(filter)),
        )
        .map_err(|e| CompositeError::Resize(e.to_string()))?;

    ImageBuffer::from_raw(target_width, target_height, dst.into_vec())
        .ok_or_else(|| CompositeError::Resize("output buffer size mismatch".to_string()))
}
