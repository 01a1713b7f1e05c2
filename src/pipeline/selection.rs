//! Selection & export over a batch's segments.
//!
//! Tracks per-segment inclusion, supports bulk toggling, and merges the
//! chosen segments back into one text block. Order is fixed at creation;
//! toggling never reorders.

use tracing::debug;

use super::segmentation::TextSegment;

pub struct SelectionModel {
    segments: Vec<TextSegment>,
}

impl SelectionModel {
    pub fn new(segments: Vec<TextSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[TextSegment] {
        &self.segments
    }

    pub fn selected_count(&self) -> usize {
        self.segments.iter().filter(|s| s.selected).count()
    }

    /// True only when every segment is currently selected.
    pub fn all_selected(&self) -> bool {
        self.segments.iter().all(|s| s.selected)
    }

    /// Flip one segment. Returns false for an unknown id.
    pub fn toggle(&mut self, id: u32) -> bool {
        match self.segments.iter_mut().find(|s| s.id == id) {
            Some(segment) => {
                segment.selected = !segment.selected;
                true
            }
            None => false,
        }
    }

    /// Set every segment to the opposite of the current all-selected
    /// state.
    pub fn toggle_all(&mut self) {
        let target = !self.all_selected();
        for segment in &mut self.segments {
            segment.selected = target;
        }
    }

    /// Concatenate the selected segments' text in list order, joined by
    /// a blank line. Consumes the model; the segment list dies here.
    pub fn export(self) -> String {
        let merged = self
            .segments
            .iter()
            .filter(|s| s.selected)
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        debug!(
            selected = self.selected_count(),
            total = self.segments.len(),
            "segments exported"
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::recognition::SpeakerSide;

    fn make_segments(texts: &[&str]) -> Vec<TextSegment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| TextSegment {
                id: i as u32,
                text: text.to_string(),
                selected: true,
                source: "image 1".to_string(),
                speaker_side: SpeakerSide::Left,
                speaker_name: None,
            })
            .collect()
    }

    #[test]
    fn segments_default_selected() {
        let model = SelectionModel::new(make_segments(&["今天有空吗", "晚上七点见"]));
        assert!(model.all_selected());
        assert_eq!(model.selected_count(), 2);
    }

    #[test]
    fn toggle_flips_one_segment() {
        let mut model = SelectionModel::new(make_segments(&["第一句", "第二句"]));
        assert!(model.toggle(1));
        assert!(!model.segments()[1].selected);
        assert!(model.segments()[0].selected);
        assert!(model.toggle(1));
        assert!(model.all_selected());
    }

    #[test]
    fn toggle_unknown_id_reports_false() {
        let mut model = SelectionModel::new(make_segments(&["只有一句"]));
        assert!(!model.toggle(42));
    }

    #[test]
    fn toggle_all_deselects_when_everything_selected() {
        let mut model = SelectionModel::new(make_segments(&["一", "二", "三"]));
        model.toggle_all();
        assert_eq!(model.selected_count(), 0);
    }

    #[test]
    fn toggle_all_selects_when_any_deselected() {
        let mut model = SelectionModel::new(make_segments(&["一", "二", "三"]));
        model.toggle(0);
        model.toggle_all();
        assert!(model.all_selected());
    }

    #[test]
    fn export_joins_selected_with_blank_line() {
        let model = SelectionModel::new(make_segments(&["你好", "最近怎么样", "改天聚聚"]));
        assert_eq!(model.export(), "你好\n\n最近怎么样\n\n改天聚聚");
    }

    #[test]
    fn export_preserves_order_regardless_of_toggle_order() {
        let mut model = SelectionModel::new(make_segments(&["甲", "乙", "丙", "丁", "戊"]));
        // Deselect in scrambled order: 3, 0, 4
        model.toggle(3);
        model.toggle(0);
        model.toggle(4);
        assert_eq!(model.export(), "乙\n\n丙");
    }

    #[test]
    fn export_with_nothing_selected_is_empty() {
        let mut model = SelectionModel::new(make_segments(&["一", "二"]));
        model.toggle_all();
        assert_eq!(model.export(), "");
    }
}
