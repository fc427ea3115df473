use anyhow::{bail, Result};

/// The point attribute that is printed in a column of a text line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Column {
    Skip,
    CoordinateX,
    CoordinateY,
    CoordinateZ,
    RawCoordinateX,
    RawCoordinateY,
    RawCoordinateZ,
    Intensity,          //U16
    ScanAngle,          //F32
    ReturnNumber,       //U8
    NumberOfReturns,    //U8
    Classification,     //U8
    UserData,           //U8
    PointSourceID,      //U16
    EdgeOfFlightLine,   //bool
    ScanDirectionFlag,  //bool
    GpsTime,            //F64
    ColorR,             //U16
    ColorG,             //U16
    ColorB,             //U16
    Nir,                //U16
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Column {
    //s - skip this column
    //x, y, z - world space coordinates
    //X, Y, Z - quantized coordinates as stored in binary formats
    //i - intensity
    //a - scan angle
    //r - return number
    //n - number of returns of given pulse
    //c - classification
    //u - user data
    //p - point source ID
    //e - edge of flight line flag
    //d - direction of scan flag
    //t - gps time
    //R, G, B - channels of RGB color
    //I - NIR channel
    pub(crate) fn parse_layout(parse_string: &str) -> Result<Vec<Column>> {
        let mut layout = Vec::with_capacity(parse_string.len());
        for character in parse_string.chars() {
            let column = match character {
                's' => Column::Skip,
                'x' => Column::CoordinateX,
                'y' => Column::CoordinateY,
                'z' => Column::CoordinateZ,
                'X' => Column::RawCoordinateX,
                'Y' => Column::RawCoordinateY,
                'Z' => Column::RawCoordinateZ,
                'i' => Column::Intensity,
                'a' => Column::ScanAngle,
                'r' => Column::ReturnNumber,
                'n' => Column::NumberOfReturns,
                'c' => Column::Classification,
                'u' => Column::UserData,
                'p' => Column::PointSourceID,
                'e' => Column::EdgeOfFlightLine,
                'd' => Column::ScanDirectionFlag,
                't' => Column::GpsTime,
                'R' => Column::ColorR,
                'G' => Column::ColorG,
                'B' => Column::ColorB,
                'I' => Column::Nir,
                _ => bail!(
                    "FormatError can't interpret format literal '{}' in parse string '{}'.",
                    character,
                    parse_string
                ),
            };
            layout.push(column);
        }
        if layout.iter().all(|column| *column == Column::Skip) {
            bail!("Parse string '{}' does not print any attribute", parse_string);
        }
        Ok(layout)
    }
}

/// Resolves a separator given by name (`space`, `comma`, `tab`, `semicolon`, `colon`, `hyphen`, `dot`)
/// into the separator itself. Anything else is used literally
pub fn separator_from_name(name: &str) -> String {
    match name {
        "space" => " ",
        "comma" => ",",
        "tab" => "\t",
        "semicolon" => ";",
        "colon" => ":",
        "hyphen" => "-",
        "dot" => ".",
        literal => literal,
    }
    .to_owned()
}

pub(crate) fn trim_unnecessary_tailing_zeros(slice: &str) -> &str {
    if !slice.contains('.') {
        return slice;
    }
    let mut end = slice.len();
    while slice[..end].ends_with('0') && !slice[..end].ends_with(".0") {
        end -= 1;
    }
    &slice[..end]
}
