use clap::Parser;

/// Renders the academy statistics dashboard from an Excel workbook.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The workbook with the statistics sheets. Setting this option overrides the
    /// path that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (file path, optional) A JSON configuration file: sheet names, funnel stage order, cache duration,
    /// default preset and opportunity thresholds.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (name, default 'Default') The saved view to start from: Default, Executive Summary, Content Team,
    /// Geo Team or Business-only.
    #[clap(short, long, value_parser)]
    pub preset: Option<String>,

    /// (month label such as 'Jan 2025') The first month of the selected range. Requires --to.
    #[clap(long, value_parser, requires = "to")]
    pub from: Option<String>,

    /// (month label such as 'Jun 2025') The last month of the selected range. Requires --from.
    #[clap(long, value_parser, requires = "from")]
    pub to: Option<String>,

    /// If passed, compares the selected range with the previous period of the same length.
    #[clap(long, takes_value = false)]
    pub compare: bool,

    /// (All, Business, Generic or Invalid) The user segment for active users and activation.
    #[clap(long, value_parser)]
    pub segment: Option<String>,

    #[clap(long, value_parser)]
    pub top_countries: Option<usize>,

    #[clap(long, value_parser)]
    pub top_courses: Option<usize>,

    /// (text) Filters the course table by name, ignoring case.
    #[clap(long, value_parser)]
    pub course_search: Option<String>,

    /// (1-based) The page of the course table.
    #[clap(long, value_parser)]
    pub page: Option<usize>,

    #[clap(long, value_parser)]
    pub page_size: Option<usize>,

    /// (file path, 'stdout' or empty) If specified, the report will be written in JSON format to the given
    /// location. Setting this option overrides the path that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference report in JSON format. If provided, academy-dash will check that the
    /// generated report matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// If passed, reads commands from the standard input after the first report.
    #[clap(long, takes_value = false)]
    pub interactive: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
