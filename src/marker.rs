use crate::config::EngineConfig;
use crate::inspector::Point;
use crate::tab::Tab;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Mutex;
use tracing::warn;

const MARK_CLASS: &str = "__tp_mark";
const LABEL_CONTAINER_ID: &str = "__tp_mark_labels";

/// Per-call overrides for a marking pass; unset fields fall back to the
/// engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkOptions {
    pub max_marks: Option<usize>,
    pub min_size_px: Option<f64>,
    pub remove_existing: Option<bool>,
    /// Fixed CSS colors to cycle through instead of randomized HSL.
    pub palette: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMark {
    pub label: u32,
    pub center: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkResult {
    pub count: usize,
    pub marks: Vec<ElementMark>,
}

/// Box outline color plus the contrasting color used for the numbered label
/// drawn on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkColor {
    pub css: String,
    pub label: String,
}

/// White text stays readable on dark fills, black on light ones.
fn contrast_for_lightness(lightness: u8) -> &'static str {
    if lightness < 45 { "#fff" } else { "#000" }
}

/// Bold random color: full hue range, high saturation, mid lightness.
fn random_hsl<R: Rng>(rng: &mut R) -> (u16, u8, u8) {
    let h = rng.gen_range(0..360);
    let s = rng.gen_range(90..=100);
    let l = rng.gen_range(30..=55);
    (h, s, l)
}

/// Generate `count` colors, either cycling a fixed palette or sampling
/// randomized HSL from the given source.
pub fn mark_colors<R: Rng>(rng: &mut R, count: usize, palette: Option<&[String]>) -> Vec<MarkColor> {
    if let Some(palette) = palette {
        if !palette.is_empty() {
            return (0..count)
                .map(|i| MarkColor {
                    css: palette[i % palette.len()].clone(),
                    label: "#fff".to_string(),
                })
                .collect();
        }
    }
    (0..count)
        .map(|_| {
            let (h, s, l) = random_hsl(rng);
            MarkColor {
                css: format!("hsl({h}, {s}%, {l}%)"),
                label: contrast_for_lightness(l).to_string(),
            }
        })
        .collect()
}

/// Draws numbered, colored overlays on interactive elements so a screenshot
/// can be referenced by label. Overlays are observational only: they never
/// intercept pointer events.
pub struct VisualMarker {
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

impl VisualMarker {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fixed random source, for deterministic colors in tests.
    pub fn with_rng(config: EngineConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Scan for visible interactive elements and draw a numbered overlay on
    /// each, up to the configured cap. Labels start at 1 in scan order. By
    /// default any prior pass's overlays are cleared first.
    pub async fn mark_visible_elements(&self, tab: &Tab, options: &MarkOptions) -> MarkResult {
        let max_marks = options.max_marks.unwrap_or(self.config.marker.max_marks);
        let min_size = options.min_size_px.unwrap_or(self.config.marker.min_size_px);
        let remove_existing = options
            .remove_existing
            .unwrap_or(self.config.marker.remove_existing);

        if remove_existing {
            self.remove_element_markers(tab).await;
        }

        let colors = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            mark_colors(&mut *rng, max_marks, options.palette.as_deref())
        };
        let colors_json = serde_json::to_string(
            &colors
                .iter()
                .map(|c| serde_json::json!({ "css": c.css, "label": c.label }))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        let script = format!(
            r#"(() => {{
                const COLORS = {colors_json};
                const MAX = {max_marks};
                const MIN = {min_size};
                const BASE =
                    'a, button, summary, textarea, select, ' +
                    'input:not([type="hidden"]), ' +
                    '[role="button"], [role="link"], [role="tab"], [role="menuitem"], ' +
                    '[role="checkbox"], [role="radio"], [role="switch"], ' +
                    '[onclick], [onmousedown]';
                const vw = window.innerWidth;
                const vh = window.innerHeight;
                let labelBox = document.getElementById('{LABEL_CONTAINER_ID}');
                if (!labelBox) {{
                    labelBox = document.createElement('div');
                    labelBox.id = '{LABEL_CONTAINER_ID}';
                    labelBox.style.cssText =
                        'position:fixed;left:0;top:0;width:0;height:0;' +
                        'pointer-events:none;z-index:2147483647;';
                    document.body.appendChild(labelBox);
                }}
                const out = [];
                let n = 0;
                for (const el of document.querySelectorAll(BASE + ', [tabindex]')) {{
                    if (n >= MAX) break;
                    if (el.closest('#{LABEL_CONTAINER_ID}')) continue;
                    if (el.hasAttribute('tabindex') && !el.matches(BASE) && el.tabIndex < 1) continue;
                    const r = el.getBoundingClientRect();
                    if (r.width < MIN || r.height < MIN) continue;
                    if (r.bottom < 0 || r.top > vh || r.right < 0 || r.left > vw) continue;
                    const cs = window.getComputedStyle(el);
                    if (cs.display === 'none' || cs.visibility === 'hidden') continue;
                    if (parseFloat(cs.opacity) === 0) continue;
                    const cx = r.left + r.width / 2;
                    const cy = r.top + r.height / 2;
                    const top = document.elementFromPoint(cx, cy);
                    if (!top || (top !== el && !el.contains(top))) continue;
                    const color = COLORS[n % COLORS.length];
                    n += 1;
                    const box = document.createElement('div');
                    box.className = '{MARK_CLASS}';
                    box.style.cssText =
                        'position:fixed;box-sizing:border-box;pointer-events:none;' +
                        'z-index:2147483646;border:2px solid ' + color.css + ';' +
                        'left:' + r.left + 'px;top:' + r.top + 'px;' +
                        'width:' + r.width + 'px;height:' + r.height + 'px;';
                    document.body.appendChild(box);
                    const label = document.createElement('div');
                    label.textContent = String(n);
                    label.style.cssText =
                        'position:fixed;pointer-events:none;' +
                        'font:bold 11px sans-serif;padding:1px 4px;border-radius:3px;' +
                        'background:' + color.css + ';color:' + color.label + ';' +
                        'left:' + (r.right - 8) + 'px;top:' + (r.top - 8) + 'px;';
                    labelBox.appendChild(label);
                    out.push({{ label: n, center: {{ x: Math.round(cx), y: Math.round(cy) }} }});
                }}
                return out;
            }})()"#
        );

        let marks: Vec<ElementMark> = match tab.eval(&script).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(marks) => marks,
                Err(e) => {
                    warn!("mark_visible_elements returned unexpected shape: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("mark_visible_elements evaluation failed: {}", e);
                Vec::new()
            }
        };

        MarkResult {
            count: marks.len(),
            marks,
        }
    }

    /// Strip every overlay box and the shared label container.
    pub async fn remove_element_markers(&self, tab: &Tab) {
        let script = format!(
            r#"(() => {{
                document.querySelectorAll('.{MARK_CLASS}').forEach((n) => n.remove());
                const box = document.getElementById('{LABEL_CONTAINER_ID}');
                if (box) box.remove();
                return true;
            }})()"#
        );
        if let Err(e) = tab.eval(&script).await {
            warn!("remove_element_markers evaluation failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn random_colors_stay_in_bold_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for color in mark_colors(&mut rng, 50, None) {
            let inner = color
                .css
                .strip_prefix("hsl(")
                .and_then(|s| s.strip_suffix(")"))
                .unwrap();
            let parts: Vec<&str> = inner.split(", ").collect();
            let h: u16 = parts[0].parse().unwrap();
            let s: u8 = parts[1].strip_suffix('%').unwrap().parse().unwrap();
            let l: u8 = parts[2].strip_suffix('%').unwrap().parse().unwrap();
            assert!(h < 360);
            assert!((90..=100).contains(&s));
            assert!((30..=55).contains(&l));
            let expected = if l < 45 { "#fff" } else { "#000" };
            assert_eq!(color.label, expected);
        }
    }

    #[test]
    fn same_seed_gives_same_colors() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        assert_eq!(mark_colors(&mut a, 10, None), mark_colors(&mut b, 10, None));
    }

    #[test]
    fn palette_cycles_in_order() {
        let palette = vec!["#ff0000".to_string(), "#00ff00".to_string()];
        let mut rng = StdRng::seed_from_u64(0);
        let colors = mark_colors(&mut rng, 5, Some(&palette));
        assert_eq!(colors[0].css, "#ff0000");
        assert_eq!(colors[1].css, "#00ff00");
        assert_eq!(colors[4].css, "#ff0000");
    }

    #[test]
    fn contrast_flips_at_mid_lightness() {
        assert_eq!(contrast_for_lightness(30), "#fff");
        assert_eq!(contrast_for_lightness(44), "#fff");
        assert_eq!(contrast_for_lightness(45), "#000");
        assert_eq!(contrast_for_lightness(55), "#000");
    }
}
