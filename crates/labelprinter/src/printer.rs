//! Print orchestration: render, encode, send.
//!
//! A job only succeeds once the final `PRINT` fragment of the last copy has
//! been written. Cancellation aborts the remaining fragments and copies;
//! since `PRINT` is always the last segment of a frame, a cancelled frame
//! never reaches it.

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use image_processor::{
    BarcodeOptions, Bitmap, ErrorCorrection, QrSize, RenderOptions, Symbology, coverage_pattern,
    generate_barcode, generate_qr, pattern, render, thermal,
};
use tokio_util::sync::CancellationToken;

use crate::config::DriverConfig;
use crate::link::Link;
use crate::options::{CopyStrategy, PrintJobSpec};
use crate::responses::{BatteryStatus, PrinterConfig, StatusFrame, StatusKind};
use crate::transport::PeripheralHandle;
use crate::tspl::{self, CommandFrame};
use crate::{LabelPrinterError, Result};

/// Default deadline for a status reply.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for a reply to a raw diagnostic command.
pub const RAW_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a completed print job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintReport {
    /// Frames sent to the printer (one per copy unless the device counts).
    pub frames_sent: u32,
    /// Labels the printer was asked to produce.
    pub labels: u32,
    /// Bytes written, including re-initialization.
    pub bytes_sent: usize,
    pub width: u32,
    pub height: u32,
}

/// Drives jobs and queries against one connected printer.
pub struct LabelPrinter<L: Link> {
    handle: Arc<PeripheralHandle<L>>,
    render_options: RenderOptions,
    query_timeout: Duration,
}

impl<L: Link> LabelPrinter<L> {
    pub fn new(handle: Arc<PeripheralHandle<L>>) -> Self {
        Self {
            handle,
            render_options: RenderOptions::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Printer using the render settings and query deadline from `config`.
    pub fn from_config(handle: Arc<PeripheralHandle<L>>, config: &DriverConfig) -> Self {
        Self::new(handle)
            .with_render_options(config.render_options())
            .with_query_timeout(config.query_timeout)
    }

    /// Builder: set image render options.
    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render_options = options;
        self
    }

    /// Builder: set the status reply deadline.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn handle(&self) -> &Arc<PeripheralHandle<L>> {
        &self.handle
    }

    /// Render `image` to the label's printable area and print it.
    pub async fn print_image(
        &self,
        image: &DynamicImage,
        spec: &PrintJobSpec,
        cancel: &CancellationToken,
    ) -> Result<PrintReport> {
        spec.validate()?;
        let (width, height) = spec.label.dots();
        let bitmap = render(image, width, height, &self.render_options)?;
        self.print_bitmap(&bitmap, spec, cancel).await
    }

    /// Print the coverage pattern scaled to the label.
    pub async fn print_test_pattern(
        &self,
        spec: &PrintJobSpec,
        cancel: &CancellationToken,
    ) -> Result<PrintReport> {
        let pattern = coverage_pattern(pattern::DEFAULT_WIDTH, pattern::DEFAULT_HEIGHT);
        self.print_image(&DynamicImage::ImageLuma8(pattern), spec, cancel)
            .await
    }

    /// Print `data` as a 1D barcode.
    pub async fn print_barcode(
        &self,
        data: &str,
        symbology: Symbology,
        options: &BarcodeOptions,
        spec: &PrintJobSpec,
        cancel: &CancellationToken,
    ) -> Result<PrintReport> {
        let img = generate_barcode(data, symbology, options)?;
        self.print_image(&DynamicImage::ImageLuma8(img), spec, cancel)
            .await
    }

    /// Print `data` as a QR code.
    pub async fn print_qr(
        &self,
        data: &str,
        size: QrSize,
        ec: ErrorCorrection,
        spec: &PrintJobSpec,
        cancel: &CancellationToken,
    ) -> Result<PrintReport> {
        let img = generate_qr(data, size, ec)?;
        self.print_image(&DynamicImage::ImageLuma8(img), spec, cancel)
            .await
    }

    /// Print an already packed bitmap.
    ///
    /// Solid burn runs are broken up before encoding, so caller-built
    /// bitmaps get the same thermal-safety pass as rendered ones.
    pub async fn print_bitmap(
        &self,
        bitmap: &Bitmap,
        spec: &PrintJobSpec,
        cancel: &CancellationToken,
    ) -> Result<PrintReport> {
        let (bitmap, cleared) = thermal::make_safe(bitmap, &self.render_options.safety)?;
        if cleared > 0 {
            tracing::warn!(cleared, "Broke up solid burn runs in supplied bitmap");
        }
        let frame = tspl::encode_print_job(spec, &bitmap)?;
        let frame_len = frame.to_bytes().len();

        let mut bytes_sent = 0;
        if self.handle.is_dirty() {
            tracing::info!(
                address = %self.handle.address(),
                "Previous job was aborted, re-initializing printer"
            );
            bytes_sent += self.reinitialize(cancel).await?;
        }

        let frames = match spec.copy_strategy {
            CopyStrategy::Resend => spec.copies,
            CopyStrategy::DeviceCount => 1,
        };
        for copy in 1..=frames {
            if cancel.is_cancelled() {
                tracing::info!(copy, frames, "Print cancelled before copy");
                return Err(LabelPrinterError::Cancelled);
            }
            self.handle.send(&frame, cancel).await?;
            bytes_sent += frame_len;
            tracing::debug!(copy, frames, "Copy sent");
        }

        let report = PrintReport {
            frames_sent: frames,
            labels: spec.copies,
            bytes_sent,
            width: bitmap.width(),
            height: bitmap.height(),
        };
        tracing::info!(
            address = %self.handle.address(),
            labels = report.labels,
            frames = report.frames_sent,
            bytes = report.bytes_sent,
            "Print job sent"
        );
        Ok(report)
    }

    /// Send `INITIALPRINTER`, clearing any partial buffer.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.reinitialize(cancel).await.map(|_| ())
    }

    pub async fn self_test(&self, cancel: &CancellationToken) -> Result<()> {
        self.handle.send(&tspl::self_test(), cancel).await
    }

    /// Feed `dots` dot lines.
    pub async fn feed(&self, dots: u32, cancel: &CancellationToken) -> Result<()> {
        self.handle.send(&tspl::feed(dots), cancel).await
    }

    pub async fn form_feed(&self, cancel: &CancellationToken) -> Result<()> {
        self.handle.send(&tspl::form_feed(), cancel).await
    }

    pub async fn beep(&self, level: u8, interval: u16, cancel: &CancellationToken) -> Result<()> {
        self.handle.send(&tspl::sound(level, interval), cancel).await
    }

    pub async fn query_config(&self, cancel: &CancellationToken) -> Result<PrinterConfig> {
        match self.query(StatusKind::Config, cancel).await? {
            StatusFrame::Config(config) => Ok(config),
            other => Err(unexpected(other)),
        }
    }

    pub async fn query_battery(&self, cancel: &CancellationToken) -> Result<BatteryStatus> {
        match self.query(StatusKind::Battery, cancel).await? {
            StatusFrame::Battery(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Largest write the firmware says it accepts.
    pub async fn query_chunk_size(&self, cancel: &CancellationToken) -> Result<u32> {
        match self.query(StatusKind::ChunkSize, cancel).await? {
            StatusFrame::ChunkSize { size } => Ok(size),
            other => Err(unexpected(other)),
        }
    }

    /// Lifetime label counter.
    pub async fn query_printed_count(&self, cancel: &CancellationToken) -> Result<u32> {
        match self.query(StatusKind::PrintedCount, cancel).await? {
            StatusFrame::PrintedCount { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    /// Diagnostic pass-through: send hex-encoded bytes as-is and return the
    /// reply, if any arrives. No command ordering is enforced.
    pub async fn send_raw_hex(
        &self,
        hex: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        let frame = CommandFrame::from_hex(hex)?;
        tracing::warn!(bytes = frame.to_bytes().len(), "Sending raw command");
        self.handle
            .query_raw(&frame, RAW_REPLY_TIMEOUT.min(self.query_timeout), cancel)
            .await
    }

    async fn query(&self, kind: StatusKind, cancel: &CancellationToken) -> Result<StatusFrame> {
        self.handle
            .query(&tspl::query(kind), kind, self.query_timeout, cancel)
            .await
    }

    async fn reinitialize(&self, cancel: &CancellationToken) -> Result<usize> {
        let frame = tspl::initialize();
        self.handle.send(&frame, cancel).await?;
        self.handle.mark_clean();
        Ok(frame.to_bytes().len())
    }
}

fn unexpected(frame: StatusFrame) -> LabelPrinterError {
    LabelPrinterError::MalformedResponse(format!("unexpected status frame {frame:?}"))
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::link::mock::{MockLink, WireLog};
    use crate::transport::{ConnectionState, TransportConfig};

    fn printer_with(link: MockLink, rx: tokio::sync::mpsc::Receiver<Vec<u8>>) -> LabelPrinter<MockLink> {
        let config = TransportConfig {
            write_timeout: Duration::from_millis(200),
            chunk_delay: Duration::ZERO,
            ..TransportConfig::default()
        };
        LabelPrinter::new(Arc::new(PeripheralHandle::new(link, rx, config)))
            .with_query_timeout(Duration::from_millis(50))
    }

    fn printer(mtu: u16) -> (LabelPrinter<MockLink>, Arc<WireLog>) {
        let (link, log, rx) = MockLink::new(mtu);
        (printer_with(link, rx), log)
    }

    fn small_bitmap() -> Bitmap {
        Bitmap::from_packed(16, 4, vec![0x0F; 8]).unwrap()
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[tokio::test]
    async fn test_copies_resend_full_sequence() {
        let (printer, log) = printer(124);
        printer.handle().negotiate_mtu().await.unwrap();
        let spec = PrintJobSpec::new().with_copies(3);

        let report = printer
            .print_bitmap(&small_bitmap(), &spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.frames_sent, 3);
        assert_eq!(report.labels, 3);

        let wire = log.bytes();
        assert_eq!(count(&wire, b"SIZE 14.0 mm,40.0 mm\r\n"), 3);
        assert_eq!(count(&wire, b"CLS\r\n"), 3);
        assert_eq!(count(&wire, b"BITMAP 0,0,2,4,1,"), 3);
        assert_eq!(count(&wire, b"PRINT 1\r\n"), 3);
        assert_eq!(report.bytes_sent, wire.len());
    }

    #[tokio::test]
    async fn test_supplied_bitmap_is_made_safe() {
        let (printer, log) = printer(124);
        let solid = Bitmap::from_packed(120, 40, vec![0x00; 15 * 40]).unwrap();

        let report = printer
            .print_bitmap(&solid, &PrintJobSpec::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((report.width, report.height), (120, 40));

        let wire = log.bytes();
        let header = b"BITMAP 0,0,15,40,1,";
        let start = wire
            .windows(header.len())
            .position(|w| w == header)
            .unwrap()
            + header.len();
        let payload = &wire[start..start + 15 * 40];
        assert!(payload.iter().all(|&b| b != 0x00));
    }

    #[tokio::test]
    async fn test_device_count_sends_once() {
        let (printer, log) = printer(124);
        let spec = PrintJobSpec::new()
            .with_copies(4)
            .with_copy_strategy(CopyStrategy::DeviceCount);

        let report = printer
            .print_bitmap(&small_bitmap(), &spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.frames_sent, 1);
        let wire = log.bytes();
        assert_eq!(count(&wire, b"CLS\r\n"), 1);
        assert!(wire.ends_with(b"PRINT 4\r\n"));
    }

    #[tokio::test]
    async fn test_print_image_end_to_end() {
        let (printer, log) = printer(124);
        printer.handle().negotiate_mtu().await.unwrap();
        let mut img = GrayImage::from_pixel(112, 320, Luma([255]));
        for y in 100..140 {
            for x in 30..70 {
                img.put_pixel(x, y, Luma([0]));
            }
        }

        let report = printer
            .print_image(
                &DynamicImage::ImageLuma8(img),
                &PrintJobSpec::new().with_density(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!((report.width, report.height), (112, 320));

        let wire = log.bytes();
        let header = b"BITMAP 0,0,14,320,1,";
        let start = wire
            .windows(header.len())
            .position(|w| w == header)
            .unwrap()
            + header.len();
        let payload = &wire[start..start + 14 * 320];
        assert!(payload.iter().all(|&b| b != 0x00), "full-burn byte on the wire");
        assert!(wire.ends_with(b"PRINT 1\r\n"));
        assert!(log.writes().iter().all(|w| w.len() <= 121));
    }

    #[tokio::test]
    async fn test_test_pattern_prints() {
        let (printer, log) = printer(124);
        let report = printer
            .print_test_pattern(&PrintJobSpec::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((report.width, report.height), (112, 320));
        assert!(log.bytes().ends_with(b"PRINT 1\r\n"));
    }

    #[tokio::test]
    async fn test_cancel_mid_job_skips_print_and_later_copies() {
        let cancel = CancellationToken::new();
        let (link, log, rx) = MockLink::new(23);
        let printer = printer_with(link.with_cancel_after(3, cancel.clone()), rx);
        let spec = PrintJobSpec::new().with_copies(2);

        let err = printer
            .print_bitmap(&small_bitmap(), &spec, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LabelPrinterError::Cancelled));
        assert_eq!(count(&log.bytes(), b"PRINT"), 0);
        assert!(printer.handle().is_dirty());
        assert_eq!(printer.handle().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_dirty_handle_is_reinitialized_first() {
        let cancel = CancellationToken::new();
        let (link, log, rx) = MockLink::new(23);
        let printer = printer_with(link.with_cancel_after(1, cancel.clone()), rx);

        let _ = printer
            .print_bitmap(&small_bitmap(), &PrintJobSpec::default(), &cancel)
            .await;
        assert!(printer.handle().is_dirty());
        let aborted = log.writes().len();

        let report = printer
            .print_bitmap(&small_bitmap(), &PrintJobSpec::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!printer.handle().is_dirty());

        let resumed = log.writes()[aborted..].concat();
        assert!(resumed.starts_with(b"INITIALPRINTER\r\nSIZE"));
        assert_eq!(report.bytes_sent, resumed.len());
    }

    #[tokio::test]
    async fn test_job_dropped_by_timeout_forces_reinit() {
        let (link, log, rx) = MockLink::new(23);
        let printer = printer_with(link.with_write_delay(Duration::from_millis(20)), rx);
        let cancel = CancellationToken::new();

        let dropped = tokio::time::timeout(
            Duration::from_millis(70),
            printer.print_bitmap(&small_bitmap(), &PrintJobSpec::default(), &cancel),
        )
        .await;
        assert!(dropped.is_err());
        assert!(printer.handle().is_dirty());
        let aborted = log.writes().len();
        assert!(aborted > 0);
        assert_eq!(count(&log.bytes(), b"PRINT"), 0);

        printer
            .print_bitmap(&small_bitmap(), &PrintJobSpec::default(), &cancel)
            .await
            .unwrap();
        let resumed = log.writes()[aborted..].concat();
        assert!(resumed.starts_with(b"INITIALPRINTER\r\n"));
        assert!(!printer.handle().is_dirty());
    }

    #[tokio::test]
    async fn test_barcode_and_qr_jobs() {
        let (printer, log) = printer(124);
        let cancel = CancellationToken::new();
        let spec = PrintJobSpec::default();

        printer
            .print_barcode(
                "400638133393",
                Symbology::Ean13,
                &BarcodeOptions::default(),
                &spec,
                &cancel,
            )
            .await
            .unwrap();
        printer
            .print_qr("https://example.com", QrSize::Small, ErrorCorrection::M, &spec, &cancel)
            .await
            .unwrap();
        assert_eq!(count(&log.bytes(), b"PRINT 1\r\n"), 2);

        let err = printer
            .print_barcode("123", Symbology::Ean13, &BarcodeOptions::default(), &spec, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LabelPrinterError::InvalidJob(_)));
    }

    #[test]
    fn test_from_config_applies_settings() {
        let (link, _log, rx) = MockLink::new(124);
        let config = DriverConfig {
            query_timeout: Duration::from_millis(750),
            max_burn_run: 4,
            auto_rotate: true,
            ..DriverConfig::default()
        };
        let handle = Arc::new(PeripheralHandle::new(link, rx, config.transport_config()));
        let printer = LabelPrinter::from_config(handle, &config);

        assert_eq!(printer.query_timeout, Duration::from_millis(750));
        assert!(printer.render_options.auto_rotate);
        assert_eq!(printer.render_options.safety.max_burn_run(), 4);
    }

    #[tokio::test]
    async fn test_queries() {
        let (link, _log, rx) = MockLink::new(124);
        let printer = printer_with(link.with_reply(b"BATTERY \x6F\x00\r\n"), rx);
        let err = printer
            .query_battery(&CancellationToken::new())
            .await
            .unwrap_err();
        // 0x6F is not valid BCD.
        assert!(matches!(err, LabelPrinterError::MalformedResponse(_)));

        let (link, log, rx) = MockLink::new(124);
        let mut frame = b"CONFIG ".to_vec();
        frame.extend_from_slice(&[0, 0xCB, 0, 0, 1, 0, 1, 4, 2, 0, b'\r', b'\n']);
        let printer = printer_with(link.with_reply(&frame), rx);
        let config = printer.query_config(&CancellationToken::new()).await.unwrap();
        assert_eq!(config.resolution, 203);
        assert_eq!(config.firmware_version, "1.4.2");
        assert_eq!(log.bytes(), b"CONFIG?\r\n");
    }

    #[tokio::test]
    async fn test_query_timeout_surfaces() {
        let (printer, _log) = printer(124);
        let err = printer
            .query_printed_count(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LabelPrinterError::Timeout { .. }));
        assert_eq!(printer.handle().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_control_commands() {
        let (printer, log) = printer(124);
        let cancel = CancellationToken::new();
        printer.initialize(&cancel).await.unwrap();
        printer.self_test(&cancel).await.unwrap();
        printer.feed(16, &cancel).await.unwrap();
        printer.form_feed(&cancel).await.unwrap();
        printer.beep(2, 100, &cancel).await.unwrap();
        assert_eq!(
            log.bytes(),
            b"INITIALPRINTER\r\nSELFTEST\r\nFEED 16\r\nFORMFEED\r\nSOUND 2,100\r\n"
        );
    }

    #[tokio::test]
    async fn test_raw_hex_passthrough() {
        let (link, log, rx) = MockLink::new(124);
        let printer = printer_with(link.with_reply(b"OK\r\n"), rx);
        let reply = printer
            .send_raw_hex("7e 21 54 0d 0a", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some(&b"OK\r\n"[..]));
        assert_eq!(log.bytes(), b"~!T\r\n");

        let err = printer
            .send_raw_hex("not hex", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LabelPrinterError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_zero_area_image_is_rejected() {
        let (printer, log) = printer(124);
        let img = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        let err = printer
            .print_image(&img, &PrintJobSpec::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LabelPrinterError::ImageTooSmall { .. }));
        assert!(log.writes().is_empty());
    }
}
