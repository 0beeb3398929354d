//! The [`PolicyGuard`]: pure admission control for conversion requests.

use std::collections::HashMap;
use std::sync::Arc;

use mf_core::{
    Composition, ConversionRequest, ConversionRoute, Element, Error, InputMedia, MediaFormat,
    MediaKind, Operation, RejectionKind, RequestSource, ResourceLimits,
};
use serde::Serialize;

use crate::table::PolicyTable;
use crate::text::{check_color, check_font_family, check_text};

const MAX_FPS: u32 = 120;
const MAX_FONT_SIZE: u32 = 1000;
const MAX_ZOOM_PERCENT: f64 = 1000.0;

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Admission {
    pub route: ConversionRoute,
    /// Minimum over every rule the request touches.
    pub limits: ResourceLimits,
    /// The (format, operation) pairs that were checked.
    pub requirements: Vec<(MediaFormat, Operation)>,
}

fn reject(kind: RejectionKind, reason: impl Into<String>) -> Error {
    Error::rejected(kind, reason)
}

/// Validates requests against a shared [`PolicyTable`].
///
/// Validation has no side effects: no engine runs, nothing touches disk.
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    table: Arc<PolicyTable>,
}

impl PolicyGuard {
    pub fn new(table: Arc<PolicyTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// Admit `request` or say why not.
    ///
    /// Checks run in a fixed order: route, rules, quota, dimensions, text.
    /// The first failing check decides the rejection.
    pub fn validate(&self, request: &ConversionRequest) -> mf_core::Result<Admission> {
        let route = check_route(request)?;
        let requirements = requirements(request, route);
        let limits = self.check_rules(&requirements)?;
        check_quota(request, &limits)?;
        self.check_dimensions(request, &limits)?;
        check_text_inputs(request)?;

        tracing::debug!(%route, ?limits, "Request admitted");

        Ok(Admission {
            route,
            limits,
            requirements,
        })
    }

    /// Post-hoc check of an artifact the pipeline produced.
    pub fn check_output(limits: &ResourceLimits, width: u32, height: u32) -> mf_core::Result<()> {
        if limits.fits(width, height) {
            Ok(())
        } else {
            Err(reject(
                RejectionKind::DimensionLimitExceeded,
                format!(
                    "output {width}x{height} exceeds the {}x{} limit",
                    limits.max_width, limits.max_height
                ),
            ))
        }
    }

    fn check_rules(
        &self,
        requirements: &[(MediaFormat, Operation)],
    ) -> mf_core::Result<ResourceLimits> {
        let mut limits = ResourceLimits::unbounded();
        for &(format, operation) in requirements {
            let rule = self.table.lookup(format, operation).ok_or_else(|| {
                reject(
                    RejectionKind::UnsupportedFormat,
                    format!("{format} is not allowed for {operation}"),
                )
            })?;
            if !rule.allowed {
                return Err(reject(
                    RejectionKind::OperationForbidden,
                    format!("{operation} on {format} is forbidden"),
                ));
            }
            limits = limits.tighten(rule.limits);
        }
        Ok(limits)
    }

    fn check_dimensions(
        &self,
        request: &ConversionRequest,
        limits: &ResourceLimits,
    ) -> mf_core::Result<()> {
        let too_big = |reason: String| reject(RejectionKind::DimensionLimitExceeded, reason);
        let opts = &request.options;

        check_extent("width", opts.width, limits.max_width)?;
        check_extent("height", opts.height, limits.max_height)?;

        if let Some(dpi) = opts.dpi {
            if dpi == 0 || dpi > self.table.max_dpi() {
                return Err(too_big(format!(
                    "dpi {dpi} outside 1..={}",
                    self.table.max_dpi()
                )));
            }
        }

        if let Some(range) = opts.pages {
            if range.first == 0 || range.is_empty() {
                return Err(too_big(format!("invalid page range {range}")));
            }
            if range.len() > limits.max_pages {
                return Err(too_big(format!(
                    "{} pages requested, limit is {}",
                    range.len(),
                    limits.max_pages
                )));
            }
        }

        if let Some(text) = &opts.text {
            check_font_size(text.font_size)?;
        }

        if let RequestSource::Composition { spec, .. } = &request.source {
            self.check_composition(spec, limits)?;
        }
        Ok(())
    }

    fn check_composition(&self, spec: &Composition, limits: &ResourceLimits) -> mf_core::Result<()> {
        let too_big = |reason: String| reject(RejectionKind::DimensionLimitExceeded, reason);

        check_extent("canvas width", Some(spec.width), limits.max_width)?;
        check_extent("canvas height", Some(spec.height), limits.max_height)?;

        if spec.fps == 0 || spec.fps > MAX_FPS {
            return Err(too_big(format!("fps {} outside 1..={MAX_FPS}", spec.fps)));
        }
        if !spec.duration_secs.is_finite() || spec.duration_secs <= 0.0 {
            return Err(too_big("composition duration must be positive".into()));
        }
        if spec.frame_count() > self.table.max_frames() {
            return Err(too_big(format!(
                "{} frames exceed the limit of {}",
                spec.frame_count(),
                self.table.max_frames()
            )));
        }
        if spec.elements.len() > self.table.max_elements() {
            return Err(too_big(format!(
                "{} elements exceed the limit of {}",
                spec.elements.len(),
                self.table.max_elements()
            )));
        }

        for element in &spec.elements {
            let (start, duration) = match element {
                Element::Image {
                    start_secs,
                    duration_secs,
                    zoom_to,
                    ..
                } => {
                    if let Some(z) = zoom_to {
                        if !z.is_finite() || *z <= 0.0 || *z > MAX_ZOOM_PERCENT {
                            return Err(too_big(format!(
                                "zoom {z}% outside (0, {MAX_ZOOM_PERCENT}]"
                            )));
                        }
                    }
                    (*start_secs, *duration_secs)
                }
                Element::Text {
                    start_secs,
                    duration_secs,
                    font_size,
                    ..
                } => {
                    check_font_size(*font_size)?;
                    (*start_secs, *duration_secs)
                }
                Element::Video { start_secs, .. } | Element::Audio { start_secs, .. } => {
                    (*start_secs, None)
                }
            };
            if !start.is_finite() || start < 0.0 {
                return Err(too_big("element start must be a non-negative number".into()));
            }
            if start >= spec.duration_secs {
                return Err(too_big(format!(
                    "element starts at {start}s, not before the {}s canvas end",
                    spec.duration_secs
                )));
            }
            if let Some(d) = duration {
                if !d.is_finite() || d <= 0.0 {
                    return Err(too_big("element duration must be positive".into()));
                }
            }
        }
        Ok(())
    }
}

fn check_extent(what: &str, value: Option<u32>, max: u32) -> mf_core::Result<()> {
    match value {
        Some(0) => Err(reject(
            RejectionKind::DimensionLimitExceeded,
            format!("{what} must be positive"),
        )),
        Some(v) if v > max => Err(reject(
            RejectionKind::DimensionLimitExceeded,
            format!("{what} {v} exceeds the limit of {max}"),
        )),
        _ => Ok(()),
    }
}

fn check_font_size(size: u32) -> mf_core::Result<()> {
    if size == 0 || size > MAX_FONT_SIZE {
        return Err(reject(
            RejectionKind::DimensionLimitExceeded,
            format!("font size {size} outside 1..={MAX_FONT_SIZE}"),
        ));
    }
    Ok(())
}

fn check_route(request: &ConversionRequest) -> mf_core::Result<ConversionRoute> {
    let unsupported = |reason: String| reject(RejectionKind::UnsupportedFormat, reason);

    match &request.source {
        RequestSource::Media(input) => {
            if input.is_empty() {
                return Err(unsupported("input is empty".into()));
            }
            ConversionRoute::resolve(input.format, request.target).ok_or_else(|| {
                unsupported(format!(
                    "cannot convert {} to {}",
                    input.format, request.target
                ))
            })
        }
        RequestSource::Composition { spec, assets } => {
            if request.target != MediaFormat::Mp4 {
                return Err(unsupported(format!(
                    "compositions render to mp4, not {}",
                    request.target
                )));
            }
            if request.options.text.is_some() {
                return Err(unsupported(
                    "compositions take text elements, not a text overlay".into(),
                ));
            }
            let by_name = index_assets(assets)?;
            for element in &spec.elements {
                let (Some(name), Some(expected)) = (element.asset(), element_kind(element)) else {
                    continue;
                };
                let asset = by_name
                    .get(name)
                    .ok_or_else(|| unsupported(format!("asset {name:?} was not supplied")))?;
                if asset.format.kind() != expected {
                    return Err(unsupported(format!(
                        "asset {name:?} is {}, expected {expected}",
                        asset.format
                    )));
                }
            }
            Ok(ConversionRoute::Compose)
        }
    }
}

fn element_kind(element: &Element) -> Option<MediaKind> {
    match element {
        Element::Image { .. } => Some(MediaKind::Image),
        Element::Video { .. } => Some(MediaKind::Video),
        Element::Audio { .. } => Some(MediaKind::Audio),
        Element::Text { .. } => None,
    }
}

fn index_assets(assets: &[InputMedia]) -> mf_core::Result<HashMap<&str, &InputMedia>> {
    let unsupported = |reason: String| reject(RejectionKind::UnsupportedFormat, reason);
    let mut by_name = HashMap::with_capacity(assets.len());
    for asset in assets {
        let name = asset
            .name
            .as_deref()
            .ok_or_else(|| unsupported("composition assets must be named".into()))?;
        if asset.is_empty() {
            return Err(unsupported(format!("asset {name:?} is empty")));
        }
        if by_name.insert(name, asset).is_some() {
            return Err(unsupported(format!("asset name {name:?} is used twice")));
        }
    }
    Ok(by_name)
}

/// Every (format, operation) pair the request needs permission for.
pub fn requirements(
    request: &ConversionRequest,
    route: ConversionRoute,
) -> Vec<(MediaFormat, Operation)> {
    let target = request.target;
    let with_text = request.options.text.is_some();
    let mut reqs = Vec::new();

    match (&request.source, route) {
        (RequestSource::Media(input), ConversionRoute::Rasterize) => {
            reqs.push((input.format, Operation::RasterizePage));
            reqs.push((target, Operation::TranscodeImage));
        }
        (RequestSource::Media(input), ConversionRoute::ImageTranscode) => {
            reqs.push((input.format, Operation::TranscodeImage));
            reqs.push((target, Operation::TranscodeImage));
        }
        (RequestSource::Media(input), ConversionRoute::MediaTranscode) => {
            reqs.push((input.format, Operation::EncodeVideo));
            reqs.push((target, Operation::EncodeVideo));
        }
        (RequestSource::Composition { spec, assets }, _) => {
            for asset in assets {
                let op = match asset.format.kind() {
                    MediaKind::Image | MediaKind::Document => Operation::TranscodeImage,
                    MediaKind::Video | MediaKind::Audio => Operation::EncodeVideo,
                };
                reqs.push((asset.format, op));
            }
            reqs.push((target, Operation::EncodeVideo));
            if spec.has_text() {
                reqs.push((target, Operation::CompositeText));
            }
        }
        (RequestSource::Media(_), ConversionRoute::Compose) => {}
    }

    if with_text {
        reqs.push((target, Operation::CompositeText));
    }

    let mut seen = std::collections::HashSet::new();
    reqs.retain(|r| seen.insert(*r));
    reqs
}

fn check_quota(request: &ConversionRequest, limits: &ResourceLimits) -> mf_core::Result<()> {
    let bytes = request.input_bytes();
    if bytes > limits.disk {
        return Err(reject(
            RejectionKind::QuotaExceeded,
            format!("input of {bytes} bytes exceeds the {} byte quota", limits.disk),
        ));
    }
    Ok(())
}

fn check_text_inputs(request: &ConversionRequest) -> mf_core::Result<()> {
    if let Some(overlay) = &request.options.text {
        check_text(&overlay.text)?;
        if let Some(family) = &overlay.font_family {
            check_font_family(family)?;
        }
        check_color(&overlay.color)?;
    }

    if let RequestSource::Composition { spec, .. } = &request.source {
        for element in &spec.elements {
            if let Element::Text {
                text,
                font_family,
                color,
                ..
            } = element
            {
                check_text(text)?;
                if let Some(family) = font_family {
                    check_font_family(family)?;
                }
                check_color(color)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::config::{PolicyConfig, PolicyRuleConfig};
    use mf_core::{ConversionOptions, ErrorKind, PageRange, TextOverlay};

    fn guard() -> PolicyGuard {
        PolicyGuard::new(Arc::new(PolicyTable::from_config(&PolicyConfig::default())))
    }

    fn pdf_to_png() -> ConversionRequest {
        ConversionRequest::new(
            InputMedia::new(MediaFormat::Pdf, b"%PDF-1.7".to_vec()),
            MediaFormat::Png,
        )
    }

    fn kind(result: mf_core::Result<Admission>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[test]
    fn admits_pdf_rasterization() {
        let admission = guard().validate(&pdf_to_png()).unwrap();
        assert_eq!(admission.route, ConversionRoute::Rasterize);
        assert_eq!(
            admission.requirements,
            vec![
                (MediaFormat::Pdf, Operation::RasterizePage),
                (MediaFormat::Png, Operation::TranscodeImage),
            ]
        );
        assert_eq!(admission.limits, ResourceLimits::default());
    }

    #[test]
    fn unknown_route_is_unsupported() {
        let req = ConversionRequest::new(
            InputMedia::new(MediaFormat::Mp3, vec![1u8]),
            MediaFormat::Png,
        );
        assert_eq!(kind(guard().validate(&req)), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn format_outside_allow_list_is_unsupported() {
        let req = ConversionRequest::new(
            InputMedia::new(MediaFormat::Bmp, vec![1u8]),
            MediaFormat::Png,
        );
        assert_eq!(kind(guard().validate(&req)), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn denied_operation_is_forbidden() {
        let mut pdf = PolicyRuleConfig::new(MediaFormat::Pdf, &[]);
        pdf.deny = vec![Operation::RasterizePage];
        let config = PolicyConfig {
            rules: vec![
                pdf,
                PolicyRuleConfig::new(MediaFormat::Png, &[Operation::TranscodeImage]),
            ],
            ..Default::default()
        };
        let guard = PolicyGuard::new(Arc::new(PolicyTable::from_config(&config)));
        assert_eq!(kind(guard.validate(&pdf_to_png())), ErrorKind::OperationForbidden);
    }

    #[test]
    fn empty_input_is_unsupported() {
        let req = ConversionRequest::new(InputMedia::new(MediaFormat::Png, Vec::new()), MediaFormat::Jpeg);
        assert_eq!(kind(guard().validate(&req)), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn oversized_input_exceeds_quota() {
        let mut rule = PolicyRuleConfig::new(MediaFormat::Png, &[Operation::TranscodeImage]);
        rule.disk_cap = 8;
        let config = PolicyConfig {
            rules: vec![rule],
            ..Default::default()
        };
        let guard = PolicyGuard::new(Arc::new(PolicyTable::from_config(&config)));
        let req = ConversionRequest::new(InputMedia::new(MediaFormat::Png, vec![0u8; 9]), MediaFormat::Png);
        assert_eq!(kind(guard.validate(&req)), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn requested_dimensions_above_cap() {
        let req = pdf_to_png().with_options(ConversionOptions {
            width: Some(20_000),
            ..Default::default()
        });
        assert_eq!(kind(guard().validate(&req)), ErrorKind::DimensionLimitExceeded);

        let req = pdf_to_png().with_options(ConversionOptions {
            height: Some(0),
            ..Default::default()
        });
        assert_eq!(kind(guard().validate(&req)), ErrorKind::DimensionLimitExceeded);
    }

    #[test]
    fn dpi_and_page_caps() {
        let req = pdf_to_png().with_options(ConversionOptions {
            dpi: Some(1200),
            ..Default::default()
        });
        assert_eq!(kind(guard().validate(&req)), ErrorKind::DimensionLimitExceeded);

        let req = pdf_to_png().with_options(ConversionOptions {
            pages: Some(PageRange::new(1, 501)),
            ..Default::default()
        });
        assert_eq!(kind(guard().validate(&req)), ErrorKind::DimensionLimitExceeded);

        let req = pdf_to_png().with_options(ConversionOptions {
            dpi: Some(300),
            pages: Some(PageRange::new(1, 500)),
            ..Default::default()
        });
        assert!(guard().validate(&req).is_ok());
    }

    #[test]
    fn text_overlay_requires_composite_rights() {
        let mut overlay = TextOverlay::new("Draft");
        overlay.font_family = Some("DejaVu Sans".into());
        let req = pdf_to_png().with_options(ConversionOptions {
            text: Some(overlay),
            ..Default::default()
        });
        let admission = guard().validate(&req).unwrap();
        assert!(admission
            .requirements
            .contains(&(MediaFormat::Png, Operation::CompositeText)));

        // Audio targets have no text rights.
        let req = ConversionRequest::new(InputMedia::new(MediaFormat::Mp4, vec![1u8]), MediaFormat::Mp3)
            .with_options(ConversionOptions {
                text: Some(TextOverlay::new("x")),
                ..Default::default()
            });
        assert_eq!(kind(guard().validate(&req)), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn unsafe_text_is_forbidden() {
        let req = pdf_to_png().with_options(ConversionOptions {
            text: Some(TextOverlay::new("@/etc/passwd")),
            ..Default::default()
        });
        assert_eq!(kind(guard().validate(&req)), ErrorKind::OperationForbidden);

        let mut overlay = TextOverlay::new("ok");
        overlay.font_family = Some("-density".into());
        let req = pdf_to_png().with_options(ConversionOptions {
            text: Some(overlay),
            ..Default::default()
        });
        assert_eq!(kind(guard().validate(&req)), ErrorKind::OperationForbidden);
    }

    fn composition(elements: Vec<Element>) -> Composition {
        Composition {
            width: 1280,
            height: 720,
            duration_secs: 5.0,
            fps: 30,
            elements,
        }
    }

    fn image_element(asset: &str) -> Element {
        Element::Image {
            asset: asset.into(),
            x: 0,
            y: 0,
            start_secs: 0.0,
            duration_secs: None,
            zoom_to: Some(150.0),
        }
    }

    #[test]
    fn admits_composition() {
        let spec = composition(vec![
            image_element("bg"),
            Element::Text {
                text: "Hello".into(),
                font_family: Some("Poppins".into()),
                font_size: 48,
                color: "#ffffff".into(),
                x: 10,
                y: 10,
                start_secs: 0.0,
                duration_secs: Some(2.0),
            },
            Element::Audio {
                asset: "music".into(),
                start_secs: 0.0,
            },
        ]);
        let req = ConversionRequest::compose(
            spec,
            vec![
                InputMedia::new(MediaFormat::Jpeg, vec![1u8]).named("bg"),
                InputMedia::new(MediaFormat::Mp3, vec![1u8]).named("music"),
            ],
        );
        let admission = guard().validate(&req).unwrap();
        assert_eq!(admission.route, ConversionRoute::Compose);
        assert_eq!(
            admission.requirements,
            vec![
                (MediaFormat::Jpeg, Operation::TranscodeImage),
                (MediaFormat::Mp3, Operation::EncodeVideo),
                (MediaFormat::Mp4, Operation::EncodeVideo),
                (MediaFormat::Mp4, Operation::CompositeText),
            ]
        );
    }

    #[test]
    fn composition_asset_problems_are_unsupported() {
        let missing = ConversionRequest::compose(composition(vec![image_element("bg")]), vec![]);
        assert_eq!(kind(guard().validate(&missing)), ErrorKind::UnsupportedFormat);

        let wrong_kind = ConversionRequest::compose(
            composition(vec![image_element("bg")]),
            vec![InputMedia::new(MediaFormat::Mp3, vec![1u8]).named("bg")],
        );
        assert_eq!(kind(guard().validate(&wrong_kind)), ErrorKind::UnsupportedFormat);

        let duplicate = ConversionRequest::compose(
            composition(vec![image_element("bg")]),
            vec![
                InputMedia::new(MediaFormat::Png, vec![1u8]).named("bg"),
                InputMedia::new(MediaFormat::Png, vec![2u8]).named("bg"),
            ],
        );
        assert_eq!(kind(guard().validate(&duplicate)), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn composition_caps() {
        let assets = || vec![InputMedia::new(MediaFormat::Png, vec![1u8]).named("bg")];

        let mut spec = composition(vec![image_element("bg")]);
        spec.width = 20_000;
        let req = ConversionRequest::compose(spec, assets());
        assert_eq!(kind(guard().validate(&req)), ErrorKind::DimensionLimitExceeded);

        let mut spec = composition(vec![image_element("bg")]);
        spec.duration_secs = 3600.0;
        let req = ConversionRequest::compose(spec, assets());
        assert_eq!(kind(guard().validate(&req)), ErrorKind::DimensionLimitExceeded);

        let spec = composition((0..65).map(|_| image_element("bg")).collect());
        let req = ConversionRequest::compose(spec, assets());
        assert_eq!(kind(guard().validate(&req)), ErrorKind::DimensionLimitExceeded);
    }

    #[test]
    fn elements_must_start_before_the_canvas_ends() {
        let starting_at = |start_secs: f64| Element::Image {
            asset: "bg".into(),
            x: 0,
            y: 0,
            start_secs,
            duration_secs: None,
            zoom_to: None,
        };
        let request = |element: Element| {
            ConversionRequest::compose(
                composition(vec![element]),
                vec![
                    InputMedia::new(MediaFormat::Png, vec![1u8]).named("bg"),
                    InputMedia::new(MediaFormat::Mp3, vec![1u8]).named("music"),
                ],
            )
        };

        assert!(guard().validate(&request(starting_at(4.9))).is_ok());

        let err = guard().validate(&request(starting_at(5.0))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionLimitExceeded);
        assert!(err.to_string().contains("canvas end"));

        let late_audio = Element::Audio {
            asset: "music".into(),
            start_secs: 12.0,
        };
        assert_eq!(
            kind(guard().validate(&request(late_audio))),
            ErrorKind::DimensionLimitExceeded
        );
    }

    #[test]
    fn output_check() {
        let limits = ResourceLimits::default();
        assert!(PolicyGuard::check_output(&limits, 100, 100).is_ok());
        let err = PolicyGuard::check_output(&limits, 16_385, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionLimitExceeded);
    }
}
