use std::fmt;

/// One frame of a captured stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub file_name: Option<String>,
    pub line_number: Option<u32>,
    pub native: bool,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        StackFrame {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: None,
            line_number: None,
            native: false,
        }
    }

    pub fn with_location(mut self, file_name: impl Into<String>, line_number: u32) -> Self {
        self.file_name = Some(file_name.into());
        self.line_number = Some(line_number);
        self
    }

    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    /// `Class.method`, the text search patterns are matched against
    pub fn call_site_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }

    pub fn call_site(&self) -> CallSite {
        CallSite {
            class_name: self.class_name.clone(),
            method_name: self.method_name.clone(),
        }
    }

    pub fn key(&self) -> FrameKey {
        FrameKey {
            class_name: self.class_name.clone(),
            method_name: self.method_name.clone(),
            line_number: self.line_number,
        }
    }

    /// Whether this frame has the same (class, method, line) identity as `key`
    pub fn matches_key(&self, key: &FrameKey) -> bool {
        self.line_number == key.line_number
            && self.method_name == key.method_name
            && self.class_name == key.class_name
    }

    /// The `(file:line)` part of the display form
    pub fn location(&self) -> String {
        if self.native {
            return "Native Method".to_string();
        }
        match (&self.file_name, self.line_number) {
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => file.clone(),
            (None, _) => "Unknown Source".to_string(),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.class_name,
            self.method_name,
            self.location()
        )
    }
}

/// A (class, method) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSite {
    pub class_name: String,
    pub method_name: String,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}()", self.class_name, self.method_name)
    }
}

/// A call site refined to a line number; identity of a call-tree node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub class_name: String,
    pub method_name: String,
    pub line_number: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_display() {
        let frame = StackFrame::new("com.acme.Worker", "run").with_location("Worker.java", 42);
        assert_eq!(frame.to_string(), "com.acme.Worker.run(Worker.java:42)");

        let frame = StackFrame::new("java.net.SocketInputStream", "socketRead0").native();
        assert_eq!(
            frame.to_string(),
            "java.net.SocketInputStream.socketRead0(Native Method)"
        );

        let frame = StackFrame::new("A", "b");
        assert_eq!(frame.to_string(), "A.b(Unknown Source)");
    }

    #[test]
    fn test_frame_key_includes_line() {
        let a = StackFrame::new("A", "run").with_location("A.java", 1);
        let b = StackFrame::new("A", "run").with_location("A.java", 2);
        assert_eq!(a.call_site(), b.call_site());
        assert_ne!(a.key(), b.key());
        assert!(a.matches_key(&a.key()));
        assert!(!a.matches_key(&b.key()));
    }
}
