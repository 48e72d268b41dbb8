//! A small element tree over `xml-rs`, shaped for descriptor rewriting:
//! attribute and child order are preserved across a load/save cycle, and
//! "attribute present" is distinct from "attribute empty".

use std::{
	fmt,
	fs::File,
	io::{self, BufReader, BufWriter, Read, Write},
	path::{Path, PathBuf},
};

use xml::reader::{EventReader, XmlEvent as ReadEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriteEvent};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
	pub name: String,
	attributes: Vec<(String, String)>,
	pub children: Vec<Element>,
}

impl Element {
	pub fn new(name: &str) -> Element {
		Element { name: name.to_owned(), attributes: Vec::new(), children: Vec::new() }
	}

	pub fn attr(&self, name: &str) -> Option<&str> {
		self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
	}

	/// Set an attribute, keeping its position if it already exists.
	pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
		let value = value.into();
		match self.attributes.iter_mut().find(|(k, _)| k == name) {
			Some((_, v)) => *v = value,
			None => self.attributes.push((name.to_owned(), value)),
		}
	}

	pub fn remove_attr(&mut self, name: &str) {
		self.attributes.retain(|(k, _)| k != name);
	}

	pub fn child(&self, name: &str) -> Option<&Element> {
		self.children.iter().find(|c| c.name == name)
	}

	pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
		self.children.iter_mut().find(|c| c.name == name)
	}

	pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
		self.children.iter().filter(move |c| c.name == name)
	}

	pub fn remove_children(&mut self, name: &str) {
		self.children.retain(|c| c.name != name);
	}

	pub fn push(&mut self, child: Element) {
		self.children.push(child);
	}

	fn write_to<W: Write>(&self, writer: &mut EventWriter<W>) -> Result<()> {
		let mut start = WriteEvent::start_element(self.name.as_str());
		for (k, v) in &self.attributes {
			start = start.attr(k.as_str(), v);
		}
		writer.write(start)?;
		for child in &self.children {
			child.write_to(writer)?;
		}
		writer.write(WriteEvent::end_element())?;
		Ok(())
	}
}

/// An XML document bound to its on-disk location.
#[derive(Debug, Clone)]
pub struct Document {
	pub path: PathBuf,
	pub root: Element,
}

impl Document {
	pub fn load(path: &Path) -> Result<Document> {
		let file = File::open(path)?;
		let root = read_root(BufReader::new(file))?;
		Ok(Document { path: path.to_owned(), root })
	}

	pub fn save(&self) -> Result<()> {
		self.save_to(&self.path)
	}

	pub fn save_to(&self, path: &Path) -> Result<()> {
		let file = File::create(path)?;
		let mut writer = EmitterConfig::new()
			.perform_indent(true)
			.create_writer(BufWriter::new(file));
		self.root.write_to(&mut writer)?;
		Ok(())
	}
}

fn read_root<R: Read>(source: R) -> Result<Element> {
	let mut parser = EventReader::new(source);
	let mut stack: Vec<Element> = Vec::new();
	let mut root = None;
	loop {
		match parser.next()? {
			ReadEvent::StartElement { name, attributes, .. } => {
				let mut element = Element::new(&name.local_name);
				for attribute in attributes {
					element.attributes.push((attribute.name.local_name, attribute.value));
				}
				stack.push(element);
			},
			ReadEvent::EndElement { .. } => {
				let element = stack.pop().expect("reader balances start/end events. qed");
				match stack.last_mut() {
					Some(parent) => parent.children.push(element),
					None => root = Some(element),
				}
			},
			ReadEvent::EndDocument => break,
			_ => {},
		}
	}
	root.ok_or_else(|| {
		io::Error::new(io::ErrorKind::InvalidData, "document has no root element").into()
	})
}

/// The monotonic publication counter replicated through manifest, descriptor
/// and import descriptor. Stored as a dotted tuple, bumped on its last
/// component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeqValue(Vec<u32>);

impl SeqValue {
	pub fn load_xml(element: &Element, name: &str) -> SeqValue {
		let parsed = element
			.attr(name)
			.map(|v| v.split('.').map(str::parse).collect::<std::result::Result<Vec<u32>, _>>());
		match parsed {
			Some(Ok(values)) => SeqValue(values),
			// Absent or garbage both restart the counter.
			_ => SeqValue::default(),
		}
	}

	pub fn store_xml(&self, element: &mut Element, name: &str) {
		element.set_attr(name, self.to_string());
	}

	pub fn bump(&mut self) {
		match self.0.last_mut() {
			Some(last) => *last += 1,
			None => self.0.push(1),
		}
	}
}

impl fmt::Display for SeqValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for value in &self.0 {
			if !first {
				write!(f, ".")?;
			}
			write!(f, "{}", value)?;
			first = false;
		}
		Ok(())
	}
}
