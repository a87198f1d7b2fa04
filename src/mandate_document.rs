//! Word rendering of a sales mandate.
//!
//! Output is a flat-OPC WordprocessingML package: a single XML file that
//! Word opens as a regular document. It is not a zipped `.docx`; clients
//! that expect one get this flat format instead, always served as
//! `application/msword` with a `.doc` name and the `Word.Document` progid.
//! Rendering is a pure projection of the records passed in; the only
//! varying input is `generated_at`.

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::models::{Expediente, Mandato};

pub const CONTENT_TYPE: &str = "application/msword";
pub const FILE_EXTENSION: &str = "doc";

const PACKAGE_NS: &str = "http://schemas.microsoft.com/office/2006/xmlPackage";
const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const OFFICE_DOCUMENT_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

type XmlResult<T> = Result<T, quick_xml::Error>;

#[derive(Debug, Clone, Copy)]
pub struct AgentInfo<'a> {
    pub nombre: &'a str,
    pub email: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct MandateDocument<'a> {
    pub expediente: &'a Expediente,
    pub mandato: &'a Mandato,
    pub asesor: Option<AgentInfo<'a>>,
    pub generated_at: DateTime<Utc>,
}

pub fn download_filename(expediente_id: i32) -> String {
    format!("mandato-expediente-{expediente_id}.{FILE_EXTENSION}")
}

/// Formats an amount the way Argentine documents print it: `ARS 150.000,00`.
pub fn format_amount(monto: f64, moneda: &str) -> String {
    let cents = (monto * 100.0).round() as i64;
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let digits = (cents / 100).to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{moneda} {sign}{grouped},{:02}", cents % 100)
}

fn format_timestamp(value: NaiveDateTime) -> String {
    value.format("%d/%m/%Y %H:%M").to_string()
}

#[derive(Clone, Copy)]
enum Style {
    Title,
    Subtitle,
    Heading,
    Body,
    Footer,
}

struct DocWriter {
    writer: Writer<Vec<u8>>,
}

impl DocWriter {
    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> XmlResult<()> {
        let mut tag = BytesStart::new(name);
        for attr in attrs {
            tag.push_attribute(*attr);
        }
        self.writer.write_event(Event::Start(tag))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> XmlResult<()> {
        let mut tag = BytesStart::new(name);
        for attr in attrs {
            tag.push_attribute(*attr);
        }
        self.writer.write_event(Event::Empty(tag))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> XmlResult<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn run(&mut self, text: &str, bold: bool, size: Option<&str>) -> XmlResult<()> {
        self.start("w:r", &[])?;
        if bold || size.is_some() {
            self.start("w:rPr", &[])?;
            if bold {
                self.empty("w:b", &[])?;
            }
            if let Some(size) = size {
                self.empty("w:sz", &[("w:val", size)])?;
            }
            self.end("w:rPr")?;
        }
        self.start("w:t", &[("xml:space", "preserve")])?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end("w:t")?;
        self.end("w:r")
    }

    fn paragraph(&mut self, text: &str, style: Style) -> XmlResult<()> {
        let (align, bold, size) = match style {
            Style::Title => (Some("center"), true, Some("32")),
            Style::Subtitle => (Some("center"), false, Some("24")),
            Style::Heading => (None, true, Some("26")),
            Style::Body => (None, false, None),
            Style::Footer => (Some("right"), false, Some("16")),
        };

        self.start("w:p", &[])?;
        if let Some(align) = align {
            self.start("w:pPr", &[])?;
            self.empty("w:jc", &[("w:val", align)])?;
            self.end("w:pPr")?;
        }
        self.run(text, bold, size)?;
        self.end("w:p")
    }

    fn field(&mut self, label: &str, value: &str) -> XmlResult<()> {
        self.start("w:p", &[])?;
        self.run(&format!("{label}: "), true, None)?;
        self.run(value, false, None)?;
        self.end("w:p")
    }

    fn blank(&mut self) -> XmlResult<()> {
        self.empty("w:p", &[])
    }
}

fn write_body(out: &mut DocWriter, doc: &MandateDocument<'_>) -> XmlResult<()> {
    let MandateDocument {
        expediente,
        mandato,
        asesor,
        generated_at,
    } = *doc;

    out.paragraph("MANDATO DE VENTA", Style::Title)?;
    out.paragraph(&format!("Expediente N° {}", expediente.id), Style::Subtitle)?;
    out.blank()?;

    out.paragraph("Datos del expediente", Style::Heading)?;
    out.field("ID", &expediente.id.to_string())?;
    out.field("Título", &expediente.titulo)?;
    out.field("Propietario", &expediente.propietario_nombre)?;
    out.field("Estado", &expediente.estado)?;
    if let Some(descripcion) = expediente.descripcion.as_deref() {
        out.field("Descripción", descripcion)?;
    }
    out.blank()?;

    out.paragraph("Datos del mandato", Style::Heading)?;
    out.field("ID", &mandato.id.to_string())?;
    out.field("Plazo", &format!("{} días", mandato.plazo_dias))?;
    out.field("Monto", &format_amount(mandato.monto, &mandato.moneda))?;
    out.field("Estado", &mandato.estado)?;
    if let Some(observaciones) = mandato.observaciones.as_deref() {
        out.field("Observaciones", observaciones)?;
    }
    out.field("Fecha de creación", &format_timestamp(mandato.created_at))?;
    out.blank()?;

    if let (true, Some(firmado_por)) = (mandato.estado == "FIRMADO", mandato.firmado_por.as_deref())
    {
        out.paragraph("Firma", Style::Heading)?;
        out.field("Firmado por", firmado_por)?;
        if let Some(fecha) = mandato.firmado_fecha {
            out.field("Fecha de firma", &format_timestamp(fecha))?;
        }
        out.blank()?;
    }

    if let Some(agent) = asesor {
        out.paragraph("Asesor responsable", Style::Heading)?;
        out.field("Nombre", agent.nombre)?;
        out.field("Email", agent.email)?;
        out.blank()?;
    }

    out.paragraph(
        &format!(
            "Documento generado el {} UTC",
            generated_at.format("%d/%m/%Y %H:%M:%S")
        ),
        Style::Footer,
    )
}

pub fn render(doc: &MandateDocument<'_>) -> XmlResult<Vec<u8>> {
    let mut out = DocWriter {
        writer: Writer::new(Vec::new()),
    };
    out.writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    out.writer
        .get_mut()
        .extend_from_slice(b"<?mso-application progid=\"Word.Document\"?>");

    out.start("pkg:package", &[("xmlns:pkg", PACKAGE_NS)])?;

    out.start(
        "pkg:part",
        &[
            ("pkg:name", "/_rels/.rels"),
            (
                "pkg:contentType",
                "application/vnd.openxmlformats-package.relationships+xml",
            ),
        ],
    )?;
    out.start("pkg:xmlData", &[])?;
    out.start("Relationships", &[("xmlns", RELATIONSHIPS_NS)])?;
    out.empty(
        "Relationship",
        &[
            ("Id", "rId1"),
            ("Type", OFFICE_DOCUMENT_REL),
            ("Target", "word/document.xml"),
        ],
    )?;
    out.end("Relationships")?;
    out.end("pkg:xmlData")?;
    out.end("pkg:part")?;

    out.start(
        "pkg:part",
        &[
            ("pkg:name", "/word/document.xml"),
            (
                "pkg:contentType",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
            ),
        ],
    )?;
    out.start("pkg:xmlData", &[])?;
    out.start("w:document", &[("xmlns:w", WORDML_NS)])?;
    out.start("w:body", &[])?;
    write_body(&mut out, doc)?;
    out.end("w:body")?;
    out.end("w:document")?;
    out.end("pkg:xmlData")?;
    out.end("pkg:part")?;

    out.end("pkg:package")?;
    Ok(out.writer.into_inner())
}
