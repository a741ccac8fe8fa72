pub mod evaluate_forecasts_command;
pub mod generate_forecasts_command;

pub use evaluate_forecasts_command::EvaluateForecastsCommand;
pub use generate_forecasts_command::GenerateForecastsCommand;
