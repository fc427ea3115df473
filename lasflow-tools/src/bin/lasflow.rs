use std::{path::PathBuf, time::Instant};

use anyhow::{bail, Context, Result};
use clap::{App, Arg, ArgMatches};
use las::Read;
use lasflow_core::{
    math::Quantizer,
    meta::PointCloudHeader,
    nalgebra::Vector3,
    point::{Point, WavePacket},
};
use lasflow_io::{
    base::PointSink,
    opener::{WriteOpener, WriteTargetConfig},
};
use log::info;
use rand::{distributions::Uniform, rngs::SmallRng, Rng, SeedableRng};

enum Input {
    File(PathBuf),
    /// Random points inside a cube of the given edge length
    Synthetic { count: usize, extent: f64 },
}

struct Args {
    pub input: Input,
    pub opener: WriteOpener,
    /// Maximum number of points per output file of a numbered output
    pub split: Option<u64>,
    pub save_config: Option<PathBuf>,
}

fn get_args() -> Result<Args> {
    let matches = App::new("lasflow")
        .version("0.1")
        .about("Streams point cloud data into LAS, LAZ, TerraSolid BIN or text files")
        .arg(
            Arg::with_name("INPUT")
                .short("i")
                .long("input")
                .takes_value(true)
                .value_name("INPUT")
                .help("Input LAS or LAZ file")
                .required_unless("SYNTHETIC"),
        )
        .arg(
            Arg::with_name("SYNTHETIC")
                .long("synthetic")
                .takes_value(true)
                .value_name("COUNT")
                .help("Generate COUNT random points instead of reading an input file"),
        )
        .arg(
            Arg::with_name("CONFIG")
                .long("config")
                .takes_value(true)
                .help("JSON file with the write target configuration. Command line options override its values"),
        )
        .arg(
            Arg::with_name("SAVE_CONFIG")
                .long("save-config")
                .takes_value(true)
                .help("Store the resulting write target configuration as JSON"),
        )
        .arg(
            Arg::with_name("OUTPUT")
                .short("o")
                .long("output")
                .takes_value(true)
                .help("Output file name. '-' or 'stdout' writes to the standard output, 'nil' discards all points"),
        )
        .arg(Arg::with_name("ODIR").long("odir").takes_value(true).help("Output directory"))
        .arg(
            Arg::with_name("ODIX")
                .long("odix")
                .takes_value(true)
                .help("Appendix added to the file name stem"),
        )
        .arg(
            Arg::with_name("OCUT")
                .long("ocut")
                .takes_value(true)
                .help("Number of characters removed from the end of the file name stem"),
        )
        .arg(
            Arg::with_name("DIGITS")
                .long("digits")
                .takes_value(true)
                .help("Number the output files with the given number of digits"),
        )
        .arg(
            Arg::with_name("SPLIT")
                .long("split")
                .takes_value(true)
                .requires("DIGITS")
                .help("Start a new numbered output file after this many points"),
        )
        .arg(
            Arg::with_name("OFORMAT")
                .long("oformat")
                .takes_value(true)
                .help("Output format: las, laz, bin, txt or default"),
        )
        .arg(Arg::with_name("STDOUT").long("stdout").help("Write to the standard output"))
        .arg(Arg::with_name("NIL").long("nil").help("Discard all points"))
        .arg(Arg::with_name("FORCE").long("force").help("Overwrite existing files"))
        .arg(
            Arg::with_name("CHUNK_SIZE")
                .long("chunk-size")
                .takes_value(true)
                .help("Points per LAZ chunk"),
        )
        .arg(
            Arg::with_name("OPARSE")
                .long("oparse")
                .takes_value(true)
                .help("Column layout of text output, e.g. xyzi"),
        )
        .arg(
            Arg::with_name("OSEP")
                .long("osep")
                .takes_value(true)
                .help("Column separator of text output (space, comma, tab, ...)"),
        )
        .arg(
            Arg::with_name("OSCALE_RGB")
                .long("oscale-rgb")
                .takes_value(true)
                .help("Factor applied to colors in text output"),
        )
        .arg(Arg::with_name("UNBUFFERED").long("unbuffered").help("Disable output buffering"))
        .get_matches();

    let config = match matches.value_of("CONFIG") {
        Some(path) => WriteTargetConfig::load(path)?,
        None => WriteTargetConfig::default(),
    };
    let opener = configure_opener(WriteOpener::from_config(config), &matches)?;

    let input = match matches.value_of("SYNTHETIC") {
        Some(count) => Input::Synthetic {
            count: count.parse().context("Invalid point count")?,
            extent: 1000.0,
        },
        None => Input::File(PathBuf::from(
            matches.value_of("INPUT").context("Missing input file")?,
        )),
    };
    let split = matches
        .value_of("SPLIT")
        .map(|split| split.parse().context("Invalid split size"))
        .transpose()?;

    Ok(Args {
        input,
        opener,
        split,
        save_config: matches.value_of("SAVE_CONFIG").map(PathBuf::from),
    })
}

fn configure_opener(mut opener: WriteOpener, matches: &ArgMatches) -> Result<WriteOpener> {
    if let Some(output) = matches.value_of("OUTPUT") {
        opener.set_file_name(output);
    }
    if let Some(directory) = matches.value_of("ODIR") {
        opener.set_directory(directory);
    }
    if let Some(appendix) = matches.value_of("ODIX") {
        opener.set_appendix(appendix);
    }
    if let Some(cut) = matches.value_of("OCUT") {
        opener.set_cut(cut.parse().context("Invalid value for --ocut")?);
    }
    if let Some(digits) = matches.value_of("DIGITS") {
        opener.set_digits(digits.parse().context("Invalid value for --digits")?);
    }
    if let Some(format) = matches.value_of("OFORMAT") {
        opener.set_format_name(format)?;
    }
    if matches.is_present("STDOUT") {
        opener.set_use_stdout(true);
    }
    if matches.is_present("NIL") {
        opener.set_use_nil(true);
    }
    if matches.is_present("FORCE") {
        opener.set_force(true);
    }
    if let Some(chunk_size) = matches.value_of("CHUNK_SIZE") {
        opener.set_chunk_size(chunk_size.parse().context("Invalid value for --chunk-size")?);
    }
    if let Some(parse_string) = matches.value_of("OPARSE") {
        opener.set_parse_string(parse_string);
    }
    if let Some(separator) = matches.value_of("OSEP") {
        opener.set_separator(separator);
    }
    if let Some(scale) = matches.value_of("OSCALE_RGB") {
        opener.set_scale_rgb(scale.parse().context("Invalid value for --oscale-rgb")?);
    }
    if matches.is_present("UNBUFFERED") {
        opener.set_buffered(false);
    }
    Ok(opener)
}

fn header_from_las(las_header: &las::Header) -> Result<PointCloudHeader> {
    let version = las_header.version();
    let format = las_header.point_format();
    let transforms = las_header.transforms();
    let mut header = PointCloudHeader::new((version.major, version.minor), format.to_u8()?);
    header.extra_bytes = format.extra_bytes;
    header.quantizer = Quantizer::new(
        Vector3::new(transforms.x.scale, transforms.y.scale, transforms.z.scale),
        Vector3::new(transforms.x.offset, transforms.y.offset, transforms.z.offset),
    );
    header.number_of_points = las_header.number_of_points();
    header.file_source_id = las_header.file_source_id();
    header.system_identifier = las_header.system_identifier().to_owned();
    header.creation_date = las_header.date();
    Ok(header)
}

fn point_from_las(las_point: las::Point) -> Point {
    let mut point = Point::at(Vector3::new(las_point.x, las_point.y, las_point.z));
    point.intensity = las_point.intensity;
    point.return_number = las_point.return_number;
    point.number_of_returns = las_point.number_of_returns;
    point.classification = u8::from(las_point.classification);
    point.classification_flags = (las_point.is_synthetic as u8)
        | (las_point.is_key_point as u8) << 1
        | (las_point.is_withheld as u8) << 2
        | (las_point.is_overlap as u8) << 3;
    point.scanner_channel = las_point.scanner_channel;
    point.scan_direction_flag = las_point.scan_direction == las::point::ScanDirection::LeftToRight;
    point.edge_of_flight_line = las_point.is_edge_of_flight_line;
    point.user_data = las_point.user_data;
    point.scan_angle = las_point.scan_angle;
    point.point_source_id = las_point.point_source_id;
    point.gps_time = las_point.gps_time.unwrap_or_default();
    if let Some(color) = las_point.color {
        point.color = Vector3::new(color.red, color.green, color.blue);
    }
    point.nir = las_point.nir.unwrap_or_default();
    if let Some(waveform) = las_point.waveform {
        point.wave_packet = WavePacket {
            descriptor_index: waveform.wave_packet_descriptor_index,
            byte_offset: waveform.byte_offset_to_waveform_data,
            packet_size: waveform.waveform_packet_size_in_bytes,
            return_point_location: waveform.return_point_waveform_location,
            parameters: Vector3::new(waveform.x_t, waveform.y_t, waveform.z_t),
        };
    }
    point.extra_bytes = las_point.extra_bytes;
    point
}

/// Writes all points of `points` to the outputs of `opener`, starting a new numbered output every `split`
/// points. Returns the number of written points
fn stream_points<I: Iterator<Item = Result<Point>>>(
    opener: &WriteOpener,
    header: &PointCloudHeader,
    points: I,
    split: Option<u64>,
) -> Result<u64> {
    let numbered = opener.get_digits().is_some();
    let open = |number: u64| -> Result<Box<dyn PointSink>> {
        if numbered {
            opener.open_numbered(header, number)
        } else {
            opener.open(header)
        }
    };

    let mut number = 0;
    let mut sink = open(number)?;
    let mut total = 0;
    for point in points {
        let point = point?;
        if split.map_or(false, |split| sink.written_point_count() >= split) {
            sink.update_header(header, true, false)?;
            total += sink.close(true)?;
            number += 1;
            sink = open(number)?;
        }
        sink.write_point(&point)?;
    }
    sink.update_header(header, true, false)?;
    total += sink.close(true)?;
    info!("Wrote {} points to {} output(s)", total, number + 1);
    Ok(total)
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    let args = get_args()?;
    if !args.opener.active() {
        bail!("No output specified, use -o, --stdout or --nil");
    }
    if let Some(path) = &args.save_config {
        args.opener.config().save(path)?;
    }

    let t_start = Instant::now();
    let count = match &args.input {
        Input::File(path) => {
            let mut reader = las::Reader::from_path(path)
                .with_context(|| format!("Could not open input file {}", path.display()))?;
            let header = header_from_las(reader.header())?;
            let points = reader
                .points()
                .map(|point| point.map(point_from_las).map_err(anyhow::Error::from));
            stream_points(&args.opener, &header, points, args.split)?
        }
        Input::Synthetic { count, extent } => {
            let header = PointCloudHeader::new((1, 2), 1);
            let mut rng = SmallRng::from_entropy();
            let coordinate = Uniform::new(0.0, *extent);
            let points = (0..*count).map(|index| {
                let mut point = Point::at(Vector3::new(
                    rng.sample(coordinate),
                    rng.sample(coordinate),
                    rng.sample(coordinate),
                ));
                point.intensity = rng.gen();
                point.gps_time = index as f64 * 0.001;
                Ok(point)
            });
            stream_points(&args.opener, &header, points, args.split)?
        }
    };
    eprintln!(
        "Wrote {} points in {:.2}s",
        count,
        t_start.elapsed().as_secs_f64()
    );
    Ok(())
}
