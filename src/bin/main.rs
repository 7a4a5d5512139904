//! flowwhois: query IP geolocation/ASN subnet tables from the command
//! line, a file, an interactive prompt, or a line-oriented TCP daemon.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use log::error;

use flowlyzer::subnet::{SubnetConfig, SubnetInfo, SubnetMode, SubnetTable4, SubnetTable6};

const ABOUT: &str = "flowwhois - IP to country/ASN/organization lookup over flowlyzer subnet tables";

#[derive(Parser)]
#[clap(name = "flowwhois", version, about = ABOUT)]
struct Opts {
    /// IPv4 subnet file
    #[clap(short = '4', long = "ipv4-file")]
    ipv4_file: Option<PathBuf>,

    /// IPv6 subnet file
    #[clap(short = '6', long = "ipv6-file")]
    ipv6_file: Option<PathBuf>,

    /// Subnet files use the begin/end-range encoding
    #[clap(long)]
    range: bool,

    /// Memory-map the subnet files instead of reading them
    #[clap(long)]
    mmap: bool,

    /// Read the addresses to look up from a file (one per line)
    #[clap(short = 'r', value_name = "file")]
    read_file: Option<PathBuf>,

    /// Comma-separated list of output fields
    /// (ip,netmask,net,mask,range,org,country,county,city,asn,lat,lng,prec,netid)
    #[clap(short = 'o', value_name = "fields")]
    output_fields: Option<String>,

    /// One line per lookup
    #[clap(short = 'l')]
    one_line: bool,

    /// Suppress the header line
    #[clap(short = 'H')]
    no_header: bool,

    /// Column separator
    #[clap(short = 's', value_name = "sep", default_value = "\t")]
    separator: String,

    /// Write the results as KML placemarks into a file
    #[clap(short = 'k', value_name = "file")]
    kml: Option<PathBuf>,

    /// Run as a line-oriented TCP daemon
    #[clap(short = 'D')]
    daemon: bool,

    /// Daemon listen address
    #[clap(short = 'a', value_name = "addr", default_value = "127.0.0.1")]
    addr: String,

    /// Daemon listen port
    #[clap(short = 'p', value_name = "port", default_value_t = 6666)]
    port: u16,

    /// Addresses to look up; reads commands from stdin when absent
    ips: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Ip,
    Netmask,
    Net,
    Mask,
    Range,
    Org,
    Country,
    County,
    City,
    Asn,
    Lat,
    Lng,
    Prec,
    Netid,
}

impl Field {
    const ALL: [Field; 14] = [
        Field::Ip,
        Field::Netmask,
        Field::Net,
        Field::Mask,
        Field::Range,
        Field::Org,
        Field::Country,
        Field::County,
        Field::City,
        Field::Asn,
        Field::Lat,
        Field::Lng,
        Field::Prec,
        Field::Netid,
    ];

    const fn name(&self) -> &'static str {
        match self {
            Field::Ip => "ip",
            Field::Netmask => "netmask",
            Field::Net => "net",
            Field::Mask => "mask",
            Field::Range => "range",
            Field::Org => "org",
            Field::Country => "country",
            Field::County => "county",
            Field::City => "city",
            Field::Asn => "asn",
            Field::Lat => "lat",
            Field::Lng => "lng",
            Field::Prec => "prec",
            Field::Netid => "netid",
        }
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .find(|f| f.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown field '{s}'"))
    }
}

struct Whois {
    table4: Option<SubnetTable4>,
    table6: Option<SubnetTable6>,
    fields: Vec<Field>,
    one_line: bool,
    no_header: bool,
    separator: String,
}

/// One resolved lookup.
struct Answer {
    ip: IpAddr,
    info: SubnetInfo,
    net: String,
    netmask: String,
    mask: String,
    range: String,
}

impl Whois {
    fn lookup(&self, ip: IpAddr) -> Answer {
        let mut answer = Answer {
            ip,
            info: SubnetInfo { org: "unknown".to_string(), ..Default::default() },
            net: "-".to_string(),
            netmask: "-".to_string(),
            mask: "-".to_string(),
            range: "-".to_string(),
        };

        match ip {
            IpAddr::V4(v4) => {
                let Some(table) = &self.table4 else { return answer };
                let idx = table.lookup(v4);
                answer.info = table.info(idx);
                if idx > 0 {
                    let rec = table.record(idx);
                    match table.mode() {
                        SubnetMode::Cidr => {
                            let net = rec.net.get();
                            let mask = rec.mask.get();
                            answer.net = Ipv4Addr::from(net).to_string();
                            answer.netmask = Ipv4Addr::from(mask).to_string();
                            answer.mask = mask.count_ones().to_string();
                            answer.range = format!(
                                "{}-{}",
                                Ipv4Addr::from(net & mask),
                                Ipv4Addr::from(net | !mask)
                            );
                        }
                        SubnetMode::Range => {
                            // the paired record holds the other boundary
                            let key = rec.net.get();
                            let other = if rec.be_flag & 0x01 != 0 {
                                table.record(idx - 1).net.get()
                            } else if idx < table.count() {
                                table.record(idx + 1).net.get()
                            } else {
                                key
                            };
                            let (begin, end) = (key.min(other), key.max(other));
                            answer.net = Ipv4Addr::from(begin).to_string();
                            answer.range =
                                format!("{}-{}", Ipv4Addr::from(begin), Ipv4Addr::from(end));
                        }
                    }
                }
            }
            IpAddr::V6(v6) => {
                let Some(table) = &self.table6 else { return answer };
                let idx = table.lookup(v6);
                answer.info = table.info(idx);
                if idx > 0 {
                    let rec = table.record(idx);
                    let net = rec.net.get();
                    answer.net = std::net::Ipv6Addr::from(net).to_string();
                    if table.mode() == SubnetMode::Cidr {
                        let mask = rec.mask.get();
                        answer.mask = mask.count_ones().to_string();
                        answer.range = format!(
                            "{}-{}",
                            std::net::Ipv6Addr::from(net & mask),
                            std::net::Ipv6Addr::from(net | !mask)
                        );
                    }
                }
            }
        }

        answer
    }

    fn field_value(&self, answer: &Answer, field: Field) -> String {
        match field {
            Field::Ip => answer.ip.to_string(),
            Field::Netmask => answer.netmask.clone(),
            Field::Net => answer.net.clone(),
            Field::Mask => answer.mask.clone(),
            Field::Range => answer.range.clone(),
            Field::Org => answer.info.org.clone(),
            Field::Country => answer.info.country.clone(),
            Field::County => answer.info.county.clone(),
            Field::City => answer.info.city.clone(),
            Field::Asn => answer.info.asn.to_string(),
            Field::Lat => answer.info.lat.to_string(),
            Field::Lng => answer.info.lng.to_string(),
            Field::Prec => answer.info.precision.to_string(),
            Field::Netid => format!("0x{:08x}", answer.info.net_id),
        }
    }

    fn print_header(&self, w: &mut dyn Write) -> io::Result<()> {
        if self.no_header || !self.one_line {
            return Ok(());
        }
        let names: Vec<&str> = self.fields.iter().map(Field::name).collect();
        writeln!(w, "%{}", names.join(&self.separator))
    }

    fn print(&self, w: &mut dyn Write, answer: &Answer) -> io::Result<()> {
        if self.one_line {
            let values: Vec<String> =
                self.fields.iter().map(|f| self.field_value(answer, *f)).collect();
            writeln!(w, "{}", values.join(&self.separator))
        } else {
            for f in &self.fields {
                writeln!(w, "{:8}{}{}", f.name(), self.separator, self.field_value(answer, *f))?;
            }
            Ok(())
        }
    }

    fn run_command(&self, w: &mut dyn Write, line: &str) -> io::Result<bool> {
        let line = line.trim();
        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "quit" | "exit" => return Ok(false),
            "help" => {
                writeln!(w, "commands: ip <addr>, header, fields, about, help, quit")?;
            }
            "about" => writeln!(w, "{ABOUT}")?,
            "fields" => {
                for f in Field::ALL {
                    writeln!(w, "{}", f.name())?;
                }
            }
            "header" => {
                let names: Vec<&str> = self.fields.iter().map(Field::name).collect();
                writeln!(w, "%{}", names.join(&self.separator))?;
            }
            "ip" => match arg.parse::<IpAddr>() {
                Ok(ip) => self.print(w, &self.lookup(ip))?,
                Err(_) => writeln!(w, "invalid address '{arg}'")?,
            },
            other => {
                // a bare address works like `ip <addr>`
                match other.parse::<IpAddr>() {
                    Ok(ip) => self.print(w, &self.lookup(ip))?,
                    Err(_) => writeln!(w, "unknown command '{other}' (try 'help')")?,
                }
            }
        }
        Ok(true)
    }
}

fn write_kml(path: &PathBuf, answers: &[Answer]) -> io::Result<()> {
    let mut w = File::create(path)?;
    writeln!(w, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
    writeln!(w, "<kml xmlns=\"http://www.opengis.net/kml/2.2\">")?;
    writeln!(w, "<Document>")?;
    for a in answers {
        writeln!(w, "  <Placemark>")?;
        writeln!(w, "    <name>{}</name>", a.ip)?;
        writeln!(w, "    <description>{} AS{}</description>", a.info.org, a.info.asn)?;
        writeln!(w, "    <Point><coordinates>{},{}</coordinates></Point>", a.info.lng, a.info.lat)?;
        writeln!(w, "  </Placemark>")?;
    }
    writeln!(w, "</Document>")?;
    writeln!(w, "</kml>")
}

fn main() -> ExitCode {
    env_logger::init();
    let opts = Opts::parse();

    if opts.ipv4_file.is_none() && opts.ipv6_file.is_none() {
        error!("at least one of --ipv4-file/--ipv6-file is required");
        return ExitCode::FAILURE;
    }

    let cfg = SubnetConfig {
        mode: if opts.range { SubnetMode::Range } else { SubnetMode::Cidr },
        mmap: opts.mmap,
    };

    let table4 = match &opts.ipv4_file {
        Some(path) => match SubnetTable4::load(path, cfg) {
            Ok(t) => Some(t),
            Err(e) => {
                error!("failed to load '{}': {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    let table6 = match &opts.ipv6_file {
        Some(path) => match SubnetTable6::load(path, cfg) {
            Ok(t) => Some(t),
            Err(e) => {
                error!("failed to load '{}': {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let fields = match &opts.output_fields {
        Some(selection) => {
            let mut fields = Vec::new();
            for name in selection.split(',') {
                match Field::from_str(name.trim()) {
                    Ok(f) => fields.push(f),
                    Err(e) => {
                        error!("{e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
            fields
        }
        None => Field::ALL.to_vec(),
    };

    let whois = Whois {
        table4,
        table6,
        fields,
        one_line: opts.one_line,
        no_header: opts.no_header,
        separator: opts.separator.clone(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut answers = Vec::new();

    let result = if opts.daemon {
        serve(&whois, &opts.addr, opts.port)
    } else if let Some(path) = &opts.read_file {
        // batch mode: addresses from a file
        match File::open(path) {
            Ok(f) => {
                let mut status = Ok(());
                if whois.print_header(&mut out).is_ok() {
                    for line in BufReader::new(f).lines() {
                        let Ok(line) = line else { break };
                        let line = line.trim();
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }
                        match line.parse::<IpAddr>() {
                            Ok(ip) => {
                                let a = whois.lookup(ip);
                                status = whois.print(&mut out, &a);
                                answers.push(a);
                            }
                            Err(_) => error!("invalid address '{line}'"),
                        }
                    }
                }
                status
            }
            Err(e) => {
                error!("failed to open '{}': {e}", path.display());
                return ExitCode::FAILURE;
            }
        }
    } else if !opts.ips.is_empty() {
        // addresses from the command line
        let mut status = whois.print_header(&mut out);
        for s in &opts.ips {
            match s.parse::<IpAddr>() {
                Ok(ip) => {
                    let a = whois.lookup(ip);
                    status = whois.print(&mut out, &a);
                    answers.push(a);
                }
                Err(_) => {
                    error!("invalid address '{s}'");
                    return ExitCode::FAILURE;
                }
            }
        }
        status
    } else {
        // interactive prompt
        let stdin = io::stdin();
        let mut status = Ok(());
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match whois.run_command(&mut out, &line) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    status = Err(e);
                    break;
                }
            }
        }
        status
    };

    if let Err(e) = result {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    if let Some(path) = &opts.kml {
        if let Err(e) = write_kml(path, &answers) {
            error!("failed to write KML '{}': {e}", path.display());
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

/// Line-oriented TCP daemon: each line is a prompt command, the response
/// is written back on the same connection.
fn serve(whois: &Whois, addr: &str, port: u16) -> io::Result<()> {
    let listener = TcpListener::bind((addr, port))?;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!("accept failed: {e}");
                continue;
            }
        };
        let mut writer = stream.try_clone()?;
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            match whois.run_command(&mut writer, &line) {
                Ok(true) => {}
                _ => break,
            }
        }
    }
    Ok(())
}
