//! Style preset resolution against tally bits

use super::{Feedback, StylePreset, Tally};

/// Tally qualifiers in the order they are tried
const TALLY_QUALIFIERS: [(Tally, &str); 4] = [
    (Tally::ACTIVE, "active"),
    (Tally::NEXT, "next"),
    (Tally::OTHER, "other"),
    (Tally::PRESENT, "present"),
];

fn find_preset<'a>(presets: &'a [StylePreset], id: &str) -> Option<&'a StylePreset> {
    presets.iter().find(|preset| preset.id == id)
}

/// Pick the preset for one class name: tally-qualified variants first, then the bare name
pub fn select_preset<'a>(
    presets: &'a [StylePreset],
    class_name: &str,
    tally: Tally,
) -> Option<&'a StylePreset> {
    TALLY_QUALIFIERS
        .iter()
        .filter(|(bit, _)| tally.contains(*bit))
        .find_map(|(_, qualifier)| find_preset(presets, &format!("{}:{}", class_name, qualifier)))
        .or_else(|| find_preset(presets, class_name))
}

/// Merge the first matching preset into the feedback.
///
/// Class names are tried in order; the first one that resolves wins. An
/// explicit `style` on the feedback is laid over the preset. Without a match
/// the feedback is returned unchanged.
pub fn resolve_style(feedback: &Feedback, presets: &[StylePreset]) -> Feedback {
    let Some(class_names) = feedback.style_class_names.as_ref() else {
        return feedback.clone();
    };

    let tally = feedback.tally_bits();
    let Some(preset) = class_names
        .iter()
        .find_map(|name| select_preset(presets, name, tally))
    else {
        return feedback.clone();
    };

    let style = match &feedback.style {
        Some(explicit) => explicit.merged_over(preset),
        None => preset.clone(),
    };

    Feedback {
        style: Some(style),
        ..feedback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset(id: &str, background: &str) -> StylePreset {
        StylePreset {
            id: id.to_string(),
            background_color: Some(background.to_string()),
            ..Default::default()
        }
    }

    fn resolved_id(feedback: &Feedback, presets: &[StylePreset]) -> Option<String> {
        resolve_style(feedback, presets).style.map(|s| s.id)
    }

    #[test]
    fn test_tally_variant_preferred() {
        let presets = vec![preset("X", "#333"), preset("X:active", "#c00")];
        let fb = Feedback::text("cam").with_tally(Tally::ACTIVE).with_classes(["X"]);

        assert_eq!(resolved_id(&fb, &presets).as_deref(), Some("X:active"));
    }

    #[test]
    fn test_falls_back_to_bare_name() {
        let presets = vec![preset("X", "#333")];
        let fb = Feedback::text("cam").with_tally(Tally::ACTIVE).with_classes(["X"]);

        assert_eq!(resolved_id(&fb, &presets).as_deref(), Some("X"));
    }

    #[test]
    fn test_qualifier_priority() {
        let presets = vec![
            preset("X:present", "#00c"),
            preset("X:next", "#0c0"),
            preset("X", "#333"),
        ];
        let fb = Feedback::text("cam")
            .with_tally(Tally::PRESENT | Tally::NEXT)
            .with_classes(["X"]);
        assert_eq!(resolved_id(&fb, &presets).as_deref(), Some("X:next"));

        // ACTIVE is set but has no preset; the next set bit with a preset wins
        let fb = Feedback::text("cam")
            .with_tally(Tally::ACTIVE | Tally::PRESENT)
            .with_classes(["X"]);
        assert_eq!(resolved_id(&fb, &presets).as_deref(), Some("X:present"));
    }

    #[test]
    fn test_no_tally_ignores_qualified() {
        let presets = vec![preset("X:active", "#c00")];
        let fb = Feedback::text("cam").with_classes(["X"]);
        assert_eq!(resolve_style(&fb, &presets), fb);
    }

    #[test]
    fn test_first_resolving_class_wins() {
        let presets = vec![preset("B", "#0b0"), preset("C", "#00c")];
        let fb = Feedback::text("cam").with_classes(["A", "C", "B"]);
        assert_eq!(resolved_id(&fb, &presets).as_deref(), Some("C"));
    }

    #[test]
    fn test_unresolved_returns_unmodified() {
        let fb = Feedback::text("cam").with_classes(["missing"]);
        assert_eq!(resolve_style(&fb, &[preset("other", "#000")]), fb);

        let plain = Feedback::text("plain");
        assert_eq!(resolve_style(&plain, &[preset("other", "#000")]), plain);
    }

    #[test]
    fn test_explicit_style_overrides_preset() {
        let presets = vec![StylePreset {
            id: "X".into(),
            background_color: Some("#333".into()),
            text_color: Some("#fff".into()),
            ..Default::default()
        }];
        let mut fb = Feedback::text("cam").with_classes(["X"]);
        fb.style = Some(StylePreset {
            text_color: Some("#f00".into()),
            ..Default::default()
        });

        let style = resolve_style(&fb, &presets).style.unwrap();
        assert_eq!(style.background_color.as_deref(), Some("#333"));
        assert_eq!(style.text_color.as_deref(), Some("#f00"));
    }
}
