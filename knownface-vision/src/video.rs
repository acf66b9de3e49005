use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Pixel layouts the camera can hand us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Rgb,
    Yuyv,
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(Self::Rgb),
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
        let pixels = (width * height) as usize;
        match self {
            Self::Rgb => {
                if data.len() < pixels * 3 {
                    anyhow::bail!("short RGB buffer: {} < {}", data.len(), pixels * 3);
                }
                Ok(data[..pixels * 3].to_vec())
            }
            Self::Yuyv => yuyv_to_rgb(pixels, data),
            Self::Grey => {
                if data.len() < pixels {
                    anyhow::bail!("short GREY buffer: {} < {}", data.len(), pixels);
                }
                Ok(data[..pixels].iter().flat_map(|&y| [y, y, y]).collect())
            }
        }
    }
}

/// A V4L2 capture device yielding RGB frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let mut fmt = dev.format().context("get format")?;
        for wanted in [b"RGB3", b"YUYV"] {
            if PixelFormat::from_fourcc(fmt.fourcc) == Some(PixelFormat::Rgb) {
                break;
            }
            let desired = Format::new(fmt.width, fmt.height, FourCC::new(wanted));
            fmt = dev.set_format(&desired).unwrap_or(fmt);
        }
        let format = PixelFormat::from_fourcc(fmt.fourcc)
            .ok_or_else(|| anyhow::anyhow!("unsupported pixel format {:?}", fmt.fourcc))?;
        log::info!(
            "camera {}: {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            format
        );

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            format,
        })
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!("captured frame seq={} len={}", meta.sequence, data.len());
        let buf = self.format.to_rgb(self.width, self.height, data)?;
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

fn yuyv_to_rgb(pixels: usize, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < pixels * 2 {
        anyhow::bail!("short YUYV buffer: {} < {}", data.len(), pixels * 2);
    }
    let mut out = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grey_expands_to_rgb() {
        let rgb = PixelFormat::Grey.to_rgb(2, 1, &[10, 200]).unwrap();
        assert_eq!(rgb, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        // two pixels sharing u = v = 128
        let rgb = PixelFormat::Yuyv.to_rgb(2, 1, &[50, 128, 90, 128]).unwrap();
        assert_eq!(rgb, vec![50, 50, 50, 90, 90, 90]);
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert!(PixelFormat::Rgb.to_rgb(2, 2, &[0; 11]).is_err());
        assert!(PixelFormat::Yuyv.to_rgb(2, 2, &[0; 7]).is_err());
        assert!(PixelFormat::Grey.to_rgb(2, 2, &[0; 3]).is_err());
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"YUYV")),
            Some(PixelFormat::Yuyv)
        );
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }
}
