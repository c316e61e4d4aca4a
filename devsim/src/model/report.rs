use std::any::Any;
use std::fmt;

use super::ModelUri;

/// Model-defined content of a final report.
///
/// This trait is implemented for any `'static` type that implements
/// [`Debug`](fmt::Debug), [`Display`](fmt::Display) and [`Send`].
pub trait ReportPayload: fmt::Debug + fmt::Display + Send + 'static {
    /// Returns the payload as [`Any`], so that it can be downcast to its
    /// concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<T> ReportPayload for T
where
    T: fmt::Debug + fmt::Display + Send + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Final report of a model and of its submodels.
///
/// The report of a coupled model aggregates the reports of its children in
/// declaration order.
#[derive(Debug)]
pub struct SimulationReport {
    uri: ModelUri,
    payload: Option<Box<dyn ReportPayload>>,
    children: Vec<SimulationReport>,
}

impl SimulationReport {
    pub(crate) fn new(
        uri: ModelUri,
        payload: Option<Box<dyn ReportPayload>>,
        children: Vec<SimulationReport>,
    ) -> Self {
        Self {
            uri,
            payload,
            children,
        }
    }

    /// Returns the URI of the reporting model.
    pub fn uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Returns the model-defined payload, if any.
    pub fn payload(&self) -> Option<&dyn ReportPayload> {
        self.payload.as_deref()
    }

    /// Returns the payload if it has the requested type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload
            .as_deref()
            .and_then(|payload| payload.as_any().downcast_ref())
    }

    /// Returns the reports of the submodels.
    pub fn children(&self) -> &[SimulationReport] {
        &self.children
    }

    /// Searches the report tree for the report of the specified model.
    pub fn find(&self, uri: &str) -> Option<&SimulationReport> {
        if self.uri.as_str() == uri {
            return Some(self);
        }

        self.children.iter().find_map(|child| child.find(uri))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.uri, indent = 2 * depth)?;
        match &self.payload {
            Some(payload) => writeln!(f, ": {payload}")?,
            None => writeln!(f)?,
        }
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }

        Ok(())
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_and_downcast() {
        let report = SimulationReport::new(
            ModelUri::new("root"),
            None,
            vec![
                SimulationReport::new(ModelUri::new("a"), Some(Box::new(3usize)), Vec::new()),
                SimulationReport::new(
                    ModelUri::new("b"),
                    None,
                    vec![SimulationReport::new(
                        ModelUri::new("b/c"),
                        Some(Box::new(String::from("done"))),
                        Vec::new(),
                    )],
                ),
            ],
        );

        assert_eq!(report.find("a").and_then(|r| r.payload_as::<usize>()), Some(&3));
        assert_eq!(
            report.find("b/c").and_then(|r| r.payload_as::<String>()).map(String::as_str),
            Some("done")
        );
        assert!(report.find("a").unwrap().payload_as::<String>().is_none());
        assert!(report.find("z").is_none());
        assert_eq!(report.to_string(), "root\n  a: 3\n  b\n    b/c: done\n");
    }
}
