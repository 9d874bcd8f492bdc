use crate::{calib, core, layout, marks};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced by the file and buffer helpers.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidGrayBuffer { expected: usize, got: usize },

    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] ::image::ImageError),

    #[error(transparent)]
    MarkDetect(#[from] marks::MarkDetectError),

    #[error(transparent)]
    Calibrate(#[from] calib::CalibrateError),
}

/// Borrow an `image::GrayImage` as the core view type.
pub fn gray_view(img: &::image::GrayImage) -> core::ImageView<'_> {
    core::ImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        format: core::PixelFormat::Gray8,
        data: img.as_raw(),
    }
}

/// Borrow an `image::RgbImage` as the core view type.
pub fn rgb_view(img: &::image::RgbImage) -> core::ImageView<'_> {
    core::ImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        format: core::PixelFormat::Rgb8,
        data: img.as_raw(),
    }
}

/// Decode a scan from disk and reduce it to 8-bit luminance.
pub fn load_scan(path: impl AsRef<Path>) -> Result<::image::GrayImage, ScanError> {
    let img = ::image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(img.to_luma8())
}

/// Convert a rendered sheet into an `image::GrayImage`.
pub fn to_gray_image(img: &core::GrayImage) -> Result<::image::GrayImage, ScanError> {
    let (Ok(w), Ok(h)) = (u32::try_from(img.width), u32::try_from(img.height)) else {
        return Err(ScanError::InvalidDimensions {
            width: img.width,
            height: img.height,
        });
    };
    if img.data.len() != img.width * img.height {
        return Err(ScanError::InvalidGrayBuffer {
            expected: img.width * img.height,
            got: img.data.len(),
        });
    }
    ::image::GrayImage::from_raw(w, h, img.data.clone()).ok_or(ScanError::InvalidDimensions {
        width: img.width,
        height: img.height,
    })
}

/// Render `template` and write it to `path`; the format follows the extension.
pub fn save_rendered(
    template: &layout::Template,
    opts: &layout::RenderOptions,
    path: impl AsRef<Path>,
) -> Result<(), ScanError> {
    let sheet = layout::render_template(template, opts);
    to_gray_image(&sheet)?.save(path)?;
    Ok(())
}

/// Run the full calibration on a decoded scan.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(template, img, config),
        fields(width = img.width(), height = img.height())
    )
)]
pub fn calibrate_image(
    template: &layout::Template,
    img: &::image::GrayImage,
    config: &calib::CalibrateConfig,
) -> Result<calib::ScanCalibration, ScanError> {
    Ok(calib::calibrate_scan(template, &gray_view(img), config)?)
}

/// Decode `path` and calibrate it against `template`.
pub fn calibrate_file(
    template: &layout::Template,
    path: impl AsRef<Path>,
    config: &calib::CalibrateConfig,
) -> Result<calib::ScanCalibration, ScanError> {
    let img = load_scan(path)?;
    calibrate_image(template, &img, config)
}

/// Detect alignment marks on a raw grayscale buffer.
pub fn detect_marks_from_gray_u8(
    width: usize,
    height: usize,
    pixels: &[u8],
    params: &marks::MarkDetectorParams,
) -> Result<marks::MarkDetection, ScanError> {
    let Some(expected) = width.checked_mul(height) else {
        return Err(ScanError::InvalidDimensions { width, height });
    };
    if pixels.len() != expected {
        return Err(ScanError::InvalidGrayBuffer {
            expected,
            got: pixels.len(),
        });
    }
    let view = core::ImageView {
        width,
        height,
        format: core::PixelFormat::Gray8,
        data: pixels,
    };
    Ok(marks::detect_alignment_marks(&view, params)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout::{generate_for_paper, ExamSpec, LayoutOptions, PaperSize, RenderOptions};

    fn template() -> layout::Template {
        let spec = ExamSpec::from_json(
            r#"{"name":"quiz","subjects":[{"name":"Math","sections":[
                {"name":"I","question_count":12,"question_type":"multiple_choice_4"}]}]}"#,
        )
        .expect("spec");
        generate_for_paper(&spec, PaperSize::Letter, 150, &LayoutOptions::default())
            .expect("letter 150")
    }

    #[test]
    fn rendered_png_calibrates_to_identity() {
        let t = template();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sheet.png");
        save_rendered(&t, &RenderOptions::default(), &path).expect("save");

        let result =
            calibrate_file(&t, &path, &calib::CalibrateConfig::default()).expect("calibrate");
        assert_eq!(result.detection.total(), 8);
        assert!(result.report.is_valid, "{:?}", result.report.issues);
        let m = result.calibration.matrix.to_array();
        assert!((m[0][0] - 1.0).abs() < 0.01 && (m[1][1] - 1.0).abs() < 0.01);
        assert!(m[0][2].abs() < 2.0 && m[1][2].abs() < 2.0);
    }

    #[test]
    fn invalid_config_surfaces_as_a_calibration_error() {
        let t = template();
        let img = ::image::GrayImage::from_pixel(1275, 1650, ::image::Luma([255]));
        let mut config = calib::CalibrateConfig::default();
        config.transform.default_confidence = -0.5;
        let err = calibrate_image(&t, &img, &config).expect_err("rejected");
        assert!(matches!(
            err,
            ScanError::Calibrate(calib::CalibrateError::Config(_))
        ));
    }

    #[test]
    fn raw_buffer_length_is_checked() {
        let err = detect_marks_from_gray_u8(10, 10, &[0u8; 99], &Default::default()).unwrap_err();
        assert!(matches!(err, ScanError::InvalidGrayBuffer { expected: 100, got: 99 }));
    }

    #[test]
    fn rgb_and_gray_views_agree() {
        let gray = ::image::GrayImage::from_pixel(4, 3, ::image::Luma([90]));
        let rgb = ::image::RgbImage::from_pixel(4, 3, ::image::Rgb([90, 90, 90]));
        assert_eq!(gray_view(&gray).intensity(2, 1), rgb_view(&rgb).intensity(2, 1));
    }
}
