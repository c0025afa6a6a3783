const UNITS: [&str; 20] = [
    "", "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine", "Ten", "Eleven",
    "Twelve", "Thirteen", "Fourteen", "Fifteen", "Sixteen", "Seventeen", "Eighteen", "Nineteen",
];

const TENS: [&str; 10] = [
    "", "", "Twenty", "Thirty", "Forty", "Fifty", "Sixty", "Seventy", "Eighty", "Ninety",
];

const SCALES: [&str; 5] = ["", "Thousand", "Million", "Billion", "Trillion"];

const CURRENCY: &str = "Singapore Dollars";

/// Render a monetary amount as English words for the amount-in-words line on
/// invoices and quotations, e.g. `1234.50` becomes
/// "One Thousand Two Hundred Thirty Four Singapore Dollars And Fifty Cents Only".
pub fn amount_in_words(amount: f64) -> String {
    if !amount.is_finite() {
        return String::new();
    }
    let amount = amount.max(0.0);
    let whole = amount.floor() as u64;
    let cents = ((amount - amount.floor()) * 100.0).round() as u64;

    if whole == 0 && cents == 0 {
        return format!("Zero {CURRENCY} Only");
    }

    let mut result = String::new();

    if whole > 0 {
        let mut n = whole;
        let mut scale = 0usize;
        let mut parts: Vec<String> = Vec::new();
        while n > 0 {
            let chunk = n % 1000;
            if chunk > 0 {
                let mut part = three_digits(chunk);
                if !SCALES[scale].is_empty() {
                    part.push(' ');
                    part.push_str(SCALES[scale]);
                }
                parts.insert(0, part);
            }
            n /= 1000;
            scale += 1;
        }
        result.push_str(&parts.join(" "));
        result.push(' ');
        result.push_str(CURRENCY);
    }

    if cents > 0 {
        if !result.is_empty() {
            result.push_str(" And ");
        }
        result.push_str(&three_digits(cents));
        result.push_str(" Cents");
    }

    result.push_str(" Only");
    capitalize_first(&result)
}

fn three_digits(mut n: u64) -> String {
    let mut words: Vec<&str> = Vec::new();
    if n >= 100 {
        words.push(UNITS[(n / 100) as usize]);
        words.push("Hundred");
        n %= 100;
    }
    if n >= 20 {
        words.push(TENS[(n / 10) as usize]);
        n %= 10;
    }
    if n > 0 {
        words.push(UNITS[n as usize]);
    }
    words.join(" ")
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
