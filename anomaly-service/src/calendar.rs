//! Weekly dimming calendars as serialized by the luminaire controllers.
//!
//! A calendar document holds seven shapes, one per weekday starting on
//! Sunday. Each shape is a list of brightness breakpoints in minutes after the
//! local midnight of the day the program starts; a night program runs past
//! 1440 into the next morning.

use std::str::FromStr;

use roxmltree::{Document, Node};

pub const DAYS_PER_WEEK: usize = 7;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalendarError {
    #[error("calendar XML is not well formed: {0}")]
    Xml(String),
    #[error("calendar element <{0}> is missing")]
    MissingElement(&'static str),
    #[error("calendar element <{element}> has invalid value '{value}'")]
    InvalidValue { element: &'static str, value: String },
    #[error("calendar must define {DAYS_PER_WEEK} shapes, found {0}")]
    ShapeCount(usize),
    #[error("shape {0} has no breakpoints")]
    EmptyShape(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub minute: i64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimmingShape {
    pub id: String,
    pub name: Option<String>,
    pub is_default: bool,
    pub sunrise_offset_minutes: i64,
    pub sunset_offset_minutes: i64,
    breakpoints: Vec<Breakpoint>,
}

impl DimmingShape {
    /// Builds a shape, sorting the breakpoints by minute.
    pub fn new(
        id: impl Into<String>,
        sunrise_offset_minutes: i64,
        sunset_offset_minutes: i64,
        mut breakpoints: Vec<Breakpoint>,
    ) -> Result<Self, CalendarError> {
        let id = id.into();
        if breakpoints.is_empty() {
            return Err(CalendarError::EmptyShape(id));
        }
        breakpoints.sort_by_key(|b| b.minute);
        Ok(Self {
            id,
            name: None,
            is_default: false,
            sunrise_offset_minutes,
            sunset_offset_minutes,
            breakpoints,
        })
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// The breakpoint active at `minute`: the latest one at or before it, or
    /// the first breakpoint when `minute` precedes all of them.
    pub fn lookup(&self, minute: i64) -> &Breakpoint {
        let idx = self.breakpoints.partition_point(|b| b.minute <= minute);
        // Shapes are never empty, see `new`.
        &self.breakpoints[idx.saturating_sub(1)]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimmingCalendar {
    shapes: Vec<DimmingShape>,
}

impl DimmingCalendar {
    /// Shapes in weekday order, Sunday first.
    pub fn new(shapes: Vec<DimmingShape>) -> Result<Self, CalendarError> {
        if shapes.len() != DAYS_PER_WEEK {
            return Err(CalendarError::ShapeCount(shapes.len()));
        }
        Ok(Self { shapes })
    }

    /// Same shape on every weekday.
    pub fn uniform(shape: DimmingShape) -> Self {
        Self {
            shapes: vec![shape; DAYS_PER_WEEK],
        }
    }

    pub fn parse(xml: &str) -> Result<Self, CalendarError> {
        let doc = Document::parse(xml).map_err(|e| CalendarError::Xml(e.to_string()))?;
        let shapes_el = doc
            .root_element()
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "shapes")
            .ok_or(CalendarError::MissingElement("shapes"))?;

        let shapes = shapes_el
            .children()
            .filter(Node::is_element)
            .map(parse_shape)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(shapes)
    }

    /// Shape for a weekday index, 0 = Sunday.
    pub fn shape(&self, weekday_index: u8) -> &DimmingShape {
        &self.shapes[usize::from(weekday_index) % DAYS_PER_WEEK]
    }

    pub fn shapes(&self) -> &[DimmingShape] {
        &self.shapes
    }

    pub fn percent_at(&self, weekday_index: u8, minute: i64) -> f64 {
        self.shape(weekday_index).lookup(minute).percent
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &'static str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn required_text<'a>(node: Node<'a, '_>, name: &'static str) -> Result<&'a str, CalendarError> {
    child(node, name)
        .ok_or(CalendarError::MissingElement(name))
        .map(|n| n.text().unwrap_or("").trim())
}

fn optional_text<'a>(node: Node<'a, '_>, name: &'static str) -> Option<&'a str> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_value<T: FromStr>(node: Node<'_, '_>, name: &'static str) -> Result<T, CalendarError> {
    let raw = required_text(node, name)?;
    raw.parse().map_err(|_| CalendarError::InvalidValue {
        element: name,
        value: raw.to_string(),
    })
}

fn parse_shape(node: Node<'_, '_>) -> Result<DimmingShape, CalendarError> {
    let id = required_text(node, "Id")?.to_string();
    let sunrise_offset: i64 = parse_value(node, "SunriseOffset")?;
    let sunset_offset: i64 = parse_value(node, "SunsetOffset")?;
    let is_default = match optional_text(node, "IsDefault") {
        Some(v) => v.eq_ignore_ascii_case("true"),
        None => false,
    };

    let items = child(node, "Items").ok_or(CalendarError::MissingElement("Items"))?;
    let breakpoints = items
        .children()
        .filter(Node::is_element)
        .map(parse_breakpoint)
        .collect::<Result<Vec<_>, _>>()?;

    let mut shape = DimmingShape::new(id, sunrise_offset, sunset_offset, breakpoints)?;
    shape.name = optional_text(node, "Name").map(str::to_string);
    shape.is_default = is_default;
    Ok(shape)
}

fn parse_breakpoint(node: Node<'_, '_>) -> Result<Breakpoint, CalendarError> {
    let minute: i64 = parse_value(node, "Minutes")?;
    let percent: f64 = parse_value(node, "Percent")?;
    if !(0.0..=100.0).contains(&percent) {
        return Err(CalendarError::InvalidValue {
            element: "Percent",
            value: percent.to_string(),
        });
    }
    Ok(Breakpoint { minute, percent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bp(minute: i64, percent: f64) -> Breakpoint {
        Breakpoint { minute, percent }
    }

    fn shape_xml(id: u32, items: &[(i64, u32)]) -> String {
        let items: String = items
            .iter()
            .enumerate()
            .map(|(i, (m, p))| {
                format!(
                    "<c:DimmingShapeItem><c:Id>{i}</c:Id><c:Minutes>{m}</c:Minutes>\
                     <c:Percent>{p}</c:Percent><c:TimeMode>Absolute</c:TimeMode></c:DimmingShapeItem>"
                )
            })
            .collect();
        format!(
            "<c:DimmingShape><c:Id>{id}</c:Id><c:IsDefault>{}</c:IsDefault><c:ShapeMode>Normal</c:ShapeMode>\
             <c:SunriseOffset>-15</c:SunriseOffset><c:SunsetOffset>10</c:SunsetOffset>\
             <c:Name>Shape {id}</c:Name><c:ColorArgb>-16711936</c:ColorArgb><c:Items>{items}</c:Items></c:DimmingShape>",
            id == 0
        )
    }

    fn calendar_xml(shapes: usize) -> String {
        let body: String = (0..shapes as u32)
            .map(|i| shape_xml(i, &[(1080, 100), (1380, 50), (1800, 100)]))
            .collect();
        format!(
            "<c:Calendar xmlns:c=\"http://schemas.citytouch.com/Common/v1.0\" \
             xmlns:i=\"http://www.w3.org/2001/XMLSchema-instance\"><c:shapes>{body}</c:shapes></c:Calendar>"
        )
    }

    #[test]
    fn lookup_returns_latest_breakpoint_at_or_before() {
        let shape = DimmingShape::new("s", 0, 0, vec![bp(0, 10.0), bp(360, 50.0), bp(1080, 10.0)]).unwrap();
        assert_eq!(shape.lookup(400).percent, 50.0);
        assert_eq!(shape.lookup(0).percent, 10.0);
        assert_eq!(shape.lookup(360).percent, 50.0);
        assert_eq!(shape.lookup(1500).percent, 10.0);
    }

    #[test]
    fn lookup_before_first_breakpoint_returns_first() {
        let shape = DimmingShape::new("s", 0, 0, vec![bp(1080, 100.0), bp(1380, 50.0)]).unwrap();
        assert_eq!(shape.lookup(600), &bp(1080, 100.0));
    }

    #[test]
    fn breakpoints_are_sorted() {
        let shape = DimmingShape::new("s", 0, 0, vec![bp(1380, 50.0), bp(1080, 100.0)]).unwrap();
        assert_eq!(shape.breakpoints(), &[bp(1080, 100.0), bp(1380, 50.0)]);
    }

    #[test]
    fn parses_seven_namespaced_shapes() {
        let cal = DimmingCalendar::parse(&calendar_xml(7)).unwrap();
        assert_eq!(cal.shapes().len(), 7);
        let sunday = cal.shape(0);
        assert_eq!(sunday.id, "0");
        assert!(sunday.is_default);
        assert_eq!(sunday.name.as_deref(), Some("Shape 0"));
        assert_eq!(sunday.sunrise_offset_minutes, -15);
        assert_eq!(sunday.sunset_offset_minutes, 10);
        assert_eq!(sunday.breakpoints(), &[bp(1080, 100.0), bp(1380, 50.0), bp(1800, 100.0)]);
        assert!(!cal.shape(6).is_default);
        assert_eq!(cal.percent_at(3, 1400), 50.0);
    }

    #[test]
    fn wrong_shape_count_is_malformed() {
        assert_eq!(DimmingCalendar::parse(&calendar_xml(6)), Err(CalendarError::ShapeCount(6)));
    }

    #[test]
    fn missing_shapes_element_is_malformed() {
        let err = DimmingCalendar::parse("<Calendar><other/></Calendar>").unwrap_err();
        assert_eq!(err, CalendarError::MissingElement("shapes"));
    }

    #[test]
    fn non_numeric_percent_is_malformed() {
        let xml = calendar_xml(7).replacen("<c:Percent>50</c:Percent>", "<c:Percent>half</c:Percent>", 1);
        let err = DimmingCalendar::parse(&xml).unwrap_err();
        assert!(matches!(err, CalendarError::InvalidValue { element: "Percent", .. }));
    }

    #[test]
    fn percent_above_hundred_is_malformed() {
        let xml = calendar_xml(7).replacen("<c:Percent>50</c:Percent>", "<c:Percent>150</c:Percent>", 1);
        assert!(DimmingCalendar::parse(&xml).is_err());
    }

    #[test]
    fn shape_without_items_is_malformed() {
        let xml = calendar_xml(7).replacen(
            &shape_xml(2, &[(1080, 100), (1380, 50), (1800, 100)]),
            &shape_xml(2, &[]),
            1,
        );
        assert_eq!(DimmingCalendar::parse(&xml), Err(CalendarError::EmptyShape("2".to_string())));
    }

    #[test]
    fn broken_xml_is_malformed() {
        assert!(matches!(DimmingCalendar::parse("<c:shapes>"), Err(CalendarError::Xml(_))));
    }
}
