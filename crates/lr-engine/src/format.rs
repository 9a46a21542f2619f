use std::fmt;

use crate::tensor::Tensor;

/// Formats one element; floats get four decimals, the rest print as integers.
fn element(value: f64, floating: bool) -> String {
    if floating {
        format!("{:.4}", value)
    } else {
        format!("{}", value as i64)
    }
}

fn write_matrix(
    f: &mut fmt::Formatter<'_>,
    values: &[String],
    rows: usize,
    cols: usize,
    width: usize,
) -> fmt::Result {
    for r in 0..rows {
        for c in 0..cols {
            write!(f, " {:>width$}", values[r * cols + c], width = width)?;
        }
        writeln!(f)?;
    }
    Ok(())
}

/// Dumps the values followed by a `[ CPUFloatType{2,3} ]` style footer.
///
/// Tensors of rank three or more print one matrix per leading index,
/// introduced by a `(i,j,.,.) =` header. Meant for debugging only.
impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (Some(kind), Some(device)) = (self.kind(), self.device()) else {
            return write!(f, "[ Tensor (undefined) ]");
        };
        let values = self.to_f64_vec().map_err(|_| fmt::Error)?;
        let dims: Vec<usize> = self.shape().dims().to_vec();
        let text: Vec<String> = values
            .iter()
            .map(|&v| element(v, kind.is_floating_point()))
            .collect();
        let width = text.iter().map(String::len).max().unwrap_or(0);

        match dims.len() {
            0 => writeln!(f, "{}", text.first().map(String::as_str).unwrap_or(""))?,
            1 => write_matrix(f, &text, dims[0], 1, width)?,
            2 => write_matrix(f, &text, dims[0], dims[1], width)?,
            n => {
                let (rows, cols) = (dims[n - 2], dims[n - 1]);
                let block = rows * cols;
                let outer: usize = dims[..n - 2].iter().product();
                for b in 0..outer {
                    let mut index = Vec::with_capacity(n - 2);
                    let mut rem = b;
                    for &d in dims[..n - 2].iter().rev() {
                        index.push(rem % d);
                        rem /= d;
                    }
                    index.reverse();
                    let prefix: Vec<String> = index.iter().map(|i| (i + 1).to_string()).collect();
                    writeln!(f, "({},.,.) = ", prefix.join(","))?;
                    if block > 0 {
                        write_matrix(f, &text[b * block..(b + 1) * block], rows, cols, width)?;
                    }
                    writeln!(f)?;
                }
            }
        }

        let sizes: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
        let device_index = match device {
            crate::kind::Device::Cuda(ordinal) => format!(" (cuda:{})", ordinal),
            crate::kind::Device::Cpu => String::new(),
        };
        write!(
            f,
            "[ {}{}Type{{{}}}{} ]",
            device.type_prefix(),
            kind.type_name(),
            sizes.join(","),
            device_index
        )
    }
}
